//! Engine dependencies (using traits for testability)
//!
//! Central container handed to the dispatcher and every processing attempt.

use std::sync::Arc;

use super::{
    BaseAuditStore, BaseEventStore, BaseModuleDirectory, BaseStorage, BaseTriggerStore,
    ChannelLocks, ModuleBridge, NatsRequester, Scheduler,
};
use crate::config::EngineSettings;

#[derive(Clone)]
pub struct EngineDeps {
    pub triggers: Arc<dyn BaseTriggerStore>,
    pub audit: Arc<dyn BaseAuditStore>,
    pub storage: Arc<dyn BaseStorage>,
    pub modules: Arc<dyn BaseModuleDirectory>,
    pub events: Arc<dyn BaseEventStore>,
    /// Progress pings, storage broadcasts and module traffic
    pub nats: Arc<dyn NatsRequester>,
    /// Throttle/debounce state, one per engine
    pub scheduler: Arc<Scheduler>,
    /// Reaction serialization channels, one per engine
    pub channels: Arc<ChannelLocks>,
    pub settings: EngineSettings,
}

impl EngineDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        triggers: Arc<dyn BaseTriggerStore>,
        audit: Arc<dyn BaseAuditStore>,
        storage: Arc<dyn BaseStorage>,
        modules: Arc<dyn BaseModuleDirectory>,
        events: Arc<dyn BaseEventStore>,
        nats: Arc<dyn NatsRequester>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            triggers,
            audit,
            storage,
            modules,
            events,
            nats,
            scheduler: Arc::new(Scheduler::new()),
            channels: Arc::new(ChannelLocks::new()),
            settings,
        }
    }

    pub fn module_bridge(&self) -> ModuleBridge {
        ModuleBridge::new(
            self.modules.clone(),
            self.nats.clone(),
            self.audit.clone(),
            self.settings.module_request_timeout,
        )
    }
}
