pub mod module;
pub mod module_session;

pub use module::{CreateModule, Module, ResolvedModule};
pub use module_session::ModuleSession;
