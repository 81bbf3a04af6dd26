//! Script sandbox.
//!
//! One Lua state per processing attempt, never reused. The state only opens
//! the `table`, `string`, `math` and `utf8` libraries and strips the base
//! functions that reach outside the script (`load`, `dofile`, ...).
//! Coroutines stay closed: the deadline hook only watches the main thread.
//! A wall-clock deadline is enforced through an instruction-count hook and
//! the allocator is capped, so a runaway script fails its own attempt only.
//! Once a phase is aborted, `pcall` and `xpcall` re-raise the abort instead
//! of handing it back to the script.
//!
//! Execution has two phases, each with its own time budget. Shared scripts
//! and the condition run with only the `event` global. When the condition holds, [`Sandbox::attach_host`]
//! installs the reaction bindings (`log`, `sleep`, `module`, `storage`) and
//! [`Sandbox::run_reaction`] runs the trigger's code.
//!
//! `Sandbox` wraps a `!Send` Lua state: create and drive it on one blocking
//! thread.

pub mod bindings;

use mlua::{
    DeserializeOptions, Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue,
    SerializeOptions, StdLib, Value, VmState,
};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::domains::events::Event;
use crate::domains::triggers::SharedScript;

pub use bindings::{HostError, ReactionHost};

/// Instructions between two deadline checks.
const DEADLINE_CHECK_INTERVAL: u32 = 10_000;

/// Base functions removed from every sandbox.
const BLOCKED_GLOBALS: &[&str] = &["load", "loadfile", "dofile", "print", "collectgarbage"];

/// Message Lua attaches to allocation failures.
const LUA_MEMORY_MESSAGE: &str = "not enough memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Wall-clock budget of each phase.
    pub timeout: Duration,
    /// Lua allocator limit in bytes.
    pub memory_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15 * 60),
            memory_limit: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("failed to prepare sandbox: {0}")]
    Setup(String),
    #[error("{0}")]
    Script(String),
}

impl From<mlua::Error> for SandboxError {
    fn from(err: mlua::Error) -> Self {
        SandboxError::Script(format_lua_error(&err))
    }
}

/// Unwraps callback wrappers so the audit trail shows the host's own message.
pub(crate) fn format_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        mlua::Error::SyntaxError { message, .. } => format!("compile error: {message}"),
        _ => format!("{err}"),
    }
}

pub(crate) fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

pub(crate) fn deserialize_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unsupported_types(false)
}

pub(crate) fn to_lua<T: Serialize + ?Sized>(lua: &Lua, value: &T) -> mlua::Result<Value> {
    lua.to_value_with(value, serialize_options())
}

pub(crate) fn from_lua(lua: &Lua, value: Value) -> mlua::Result<JsonValue> {
    lua.from_value_with(value, deserialize_options())
}

/// Lua truthiness: only `nil` and `false` are falsy.
fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

fn is_memory_error(value: &Value) -> bool {
    match value {
        Value::Error(err) => matches!(**err, mlua::Error::MemoryError(_)),
        Value::String(message) => message.to_string_lossy() == LUA_MEMORY_MESSAGE,
        _ => false,
    }
}

pub(crate) fn timed_out(timeout: Duration) -> String {
    format!("script timed out after {:?}", timeout)
}

/// Abort reason of the running phase. Once tripped, every deadline check
/// and every protected call fails with the same error.
#[derive(Debug, Default)]
pub(crate) struct Tripwire {
    reason: Mutex<Option<String>>,
}

impl Tripwire {
    /// Records `reason` unless a reason is already set, and returns the
    /// error to raise.
    pub(crate) fn trip(&self, reason: String) -> mlua::Error {
        let mut current = self.reason.lock().unwrap_or_else(|e| e.into_inner());
        mlua::Error::RuntimeError(current.get_or_insert(reason).clone())
    }

    pub(crate) fn tripped(&self) -> Option<mlua::Error> {
        self.reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .map(mlua::Error::RuntimeError)
    }

    fn reset(&self) {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

pub struct Sandbox {
    lua: Lua,
    deadline: Instant,
    timeout: Duration,
    tripwire: Arc<Tripwire>,
}

impl Sandbox {
    /// Creates a sandbox with the `event` global set.
    pub fn new(event: &Event, limits: SandboxLimits) -> Result<Self, SandboxError> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )
        .map_err(|e| SandboxError::Setup(e.to_string()))?;

        let sandbox = Self {
            lua,
            deadline: Instant::now() + limits.timeout,
            timeout: limits.timeout,
            tripwire: Arc::new(Tripwire::default()),
        };
        sandbox
            .prepare(event, limits.memory_limit)
            .map_err(|e| SandboxError::Setup(format_lua_error(&e)))?;
        Ok(sandbox)
    }

    fn prepare(&self, event: &Event, memory_limit: usize) -> mlua::Result<()> {
        let globals = self.lua.globals();
        for name in BLOCKED_GLOBALS {
            globals.raw_set(*name, Value::Nil)?;
        }
        for name in ["pcall", "xpcall"] {
            let protected: Function = globals.get(name)?;
            globals.raw_set(name, self.rethrowing(protected)?)?;
        }

        let event_table = to_lua(
            &self.lua,
            &json!({
                "id": event.id,
                "name": event.name,
                "payload": event.payload,
                "emitted_at": event.emitted_at.to_rfc3339(),
                "emitter_code": event.emitter_code,
                "emitter_name": event.emitter_name,
            }),
        )?;
        globals.set("event", event_table)?;

        self.lua.set_memory_limit(memory_limit)?;
        Ok(())
    }

    /// Wraps a protected-call builtin so a tripped phase or an allocation
    /// failure propagates past it.
    fn rethrowing(&self, protected: Function) -> mlua::Result<Function> {
        let tripwire = self.tripwire.clone();
        self.lua.create_function(move |_, args: MultiValue| {
            let results: MultiValue = protected.call(args)?;
            if let Some(err) = tripwire.tripped() {
                return Err(err);
            }
            let failed = matches!(results.front(), Some(Value::Boolean(false)));
            if failed && results.get(1).is_some_and(is_memory_error) {
                return Err(tripwire.trip("memory limit exceeded".to_string()));
            }
            Ok(results)
        })
    }

    fn guarded<R>(&self, run: impl FnOnce(&Lua) -> mlua::Result<R>) -> mlua::Result<R> {
        let deadline = self.deadline;
        let timeout = self.timeout;
        let tripwire = self.tripwire.clone();
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(DEADLINE_CHECK_INTERVAL),
            move |_lua, _debug| {
                if let Some(err) = tripwire.tripped() {
                    return Err(err);
                }
                if Instant::now() >= deadline {
                    return Err(tripwire.trip(timed_out(timeout)));
                }
                Ok(VmState::Continue)
            },
        );
        let result = run(&self.lua);
        self.lua.remove_hook();
        result
    }

    /// Runs shared scripts in order. A failing script is logged and skipped.
    ///
    /// Returns the number of scripts that failed.
    pub fn load_shared(&self, scripts: &[SharedScript]) -> usize {
        let mut failed = 0;
        for script in scripts {
            let result = self.guarded(|lua| lua.load(script.code.as_str()).set_name(format!("={}", script.name)).exec());
            if let Err(e) = result {
                failed += 1;
                tracing::warn!(
                    shared = %script.name,
                    error = %format_lua_error(&e),
                    "shared script failed"
                );
            }
        }
        failed
    }

    /// Evaluates a condition. Accepts an expression (`event.payload.x == 1`)
    /// or a block ending in `return`.
    pub fn evaluate_condition(&self, code: &str) -> Result<bool, SandboxError> {
        let value: Value = self.guarded(|lua| lua.load(code).set_name("=condition").eval())?;
        Ok(is_truthy(&value))
    }

    /// Installs the reaction bindings backed by `host` and starts the
    /// reaction's own time budget.
    pub fn attach_host(&mut self, host: Arc<dyn ReactionHost>) -> Result<(), SandboxError> {
        self.deadline = Instant::now() + self.timeout;
        self.tripwire.reset();
        bindings::install(&self.lua, host, self.deadline, self.timeout, self.tripwire.clone())?;
        Ok(())
    }

    pub fn run_reaction(&self, code: &str) -> Result<(), SandboxError> {
        self.guarded(|lua| lua.load(code).set_name("=reaction").exec())?;
        Ok(())
    }

    /// Reads a global as JSON. Used to inspect script state.
    pub fn global_json(&self, name: &str) -> Result<JsonValue, SandboxError> {
        let value: Value = self.lua.globals().get(name)?;
        Ok(from_lua(&self.lua, value)?)
    }
}
