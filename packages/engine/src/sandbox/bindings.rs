//! Reaction-phase bindings: `log`, `sleep`, `module.request`,
//! `module.notify`, `storage.get`, `storage.set`.

use mlua::{Lua, MultiValue, Value};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::{from_lua, timed_out, to_lua, Tripwire};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error("storage {op} key cannot be less than {min} chars")]
    KeyTooShort { op: &'static str, min: usize },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{0}")]
    Module(String),
}

/// Host side of the reaction bindings.
///
/// Called from the sandbox thread; implementations block on async work.
pub trait ReactionHost: Send + Sync {
    /// Appends a log entry. Must not wait for the write.
    fn log(&self, entry: JsonValue);

    fn module_request(
        &self,
        module: &str,
        method: &str,
        params: JsonValue,
    ) -> Result<JsonValue, HostError>;

    /// Fire-and-forget. Failures stay on the host side.
    fn module_notify(&self, module: &str, method: &str, params: JsonValue);

    fn storage_get(&self, key: &str) -> Result<Option<JsonValue>, HostError>;

    fn storage_set(&self, key: &str, value: JsonValue) -> Result<JsonValue, HostError>;
}

fn raise(err: HostError) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}

/// Turns `log(...)` arguments into one entry: a single argument as-is,
/// several as an array.
fn log_entry(lua: &Lua, args: MultiValue) -> mlua::Result<Option<JsonValue>> {
    let mut values = args
        .into_iter()
        .map(|value| from_lua(lua, value))
        .collect::<mlua::Result<Vec<_>>>()?;
    Ok(match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(JsonValue::Array(values)),
    })
}

pub(super) fn install(
    lua: &Lua,
    host: Arc<dyn ReactionHost>,
    deadline: Instant,
    timeout: Duration,
    tripwire: Arc<Tripwire>,
) -> mlua::Result<()> {
    let globals = lua.globals();

    let log_host = host.clone();
    globals.set(
        "log",
        lua.create_function(move |lua, args: MultiValue| {
            if let Some(entry) = log_entry(lua, args)? {
                log_host.log(entry);
            }
            Ok(())
        })?,
    )?;

    // Blocks the sandbox thread. Never sleeps past the sandbox deadline.
    globals.set(
        "sleep",
        lua.create_function(move |_, ms: u64| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wanted = Duration::from_millis(ms);
            std::thread::sleep(wanted.min(remaining));
            if wanted > remaining {
                return Err(tripwire.trip(timed_out(timeout)));
            }
            Ok(())
        })?,
    )?;

    let module = lua.create_table()?;
    let request_host = host.clone();
    module.set(
        "request",
        lua.create_function(
            move |lua, (name, method, params): (String, String, Value)| {
                let params = from_lua(lua, params)?;
                let result = request_host
                    .module_request(&name, &method, params)
                    .map_err(raise)?;
                to_lua(lua, &result)
            },
        )?,
    )?;
    let notify_host = host.clone();
    module.set(
        "notify",
        lua.create_function(
            move |lua, (name, method, params): (String, String, Value)| {
                let params = from_lua(lua, params)?;
                notify_host.module_notify(&name, &method, params);
                Ok(())
            },
        )?,
    )?;
    globals.set("module", module)?;

    let storage = lua.create_table()?;
    let get_host = host.clone();
    storage.set(
        "get",
        lua.create_function(move |lua, key: String| {
            match get_host.storage_get(&key).map_err(raise)? {
                Some(value) => to_lua(lua, &value),
                None => Ok(Value::Nil),
            }
        })?,
    )?;
    let set_host = host;
    storage.set(
        "set",
        lua.create_function(move |lua, (key, value): (String, Value)| {
            let value = from_lua(lua, value)?;
            let stored = set_host.storage_set(&key, value).map_err(raise)?;
            to_lua(lua, &stored)
        })?,
    )?;
    globals.set("storage", storage)?;

    Ok(())
}
