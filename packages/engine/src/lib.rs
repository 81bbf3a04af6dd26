// Event automation engine - core
//
// Matches emitted events to trigger conditions, runs the user scripts in a
// Lua sandbox and records every attempt in the audit trail. Modules are
// reached over NATS, definitions and the audit trail live in Postgres.

pub mod common;
pub mod config;
pub mod domains;
pub mod engine;
pub mod kernel;
pub mod sandbox;

pub use config::*;
