pub mod events;
pub mod modules;
pub mod processes;
pub mod storage;
pub mod triggers;
