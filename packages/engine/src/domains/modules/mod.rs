pub mod models;

pub use models::{CreateModule, Module, ModuleSession, ResolvedModule};
