//! Kernel module - engine infrastructure and dependencies.

pub mod channel_lock;
pub mod deps;
pub mod module_bridge;
pub mod module_registry;
pub mod nats;
pub mod postgres;
pub mod reply_router;
pub mod scheduler;
pub mod test_dependencies;
pub mod traits;

pub use channel_lock::{ChannelGuard, ChannelLocks};
pub use deps::EngineDeps;
pub use module_bridge::{
    BridgeError, CallContext, ModuleBridge, DEFAULT_MODULE_REQUEST_TIMEOUT, NOT_CONNECTED,
};
pub use module_registry::ModuleSessionRegistry;
pub use nats::{
    NatsClientPublisher, NatsModuleTransport, NatsPublisher, NatsRequester, PublishedMessage,
    RequestError, TestNats,
};
pub use postgres::PostgresStore;
pub use reply_router::ReplyRouter;
pub use scheduler::{Decision, Scheduler, TrailingJob};
pub use test_dependencies::{InMemoryStore, StorageCall, TestDependencies};
pub use traits::*;
