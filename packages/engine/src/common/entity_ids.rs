//! Typed ID definitions for every record the engine reads or writes.

pub use super::id::{Id, V4, V7};

// ============================================================================
// Entity marker types
// ============================================================================

pub struct Organization;

/// Marker type for emitted events.
pub struct Event;

pub struct Trigger;

/// Marker type for trigger conditions (the guards bound to a trigger).
pub struct Condition;

pub struct SharedScript;

/// Marker type for processing attempts (one per event/condition pair).
pub struct Process;

pub struct ProcessRequest;

pub struct ProcessLog;

/// Marker type for modules (remote peers reachable over the bus).
pub struct Module;

/// Marker type for live module connections.
pub struct ModuleSession;

/// Marker type for correlation of module request/reply pairs.
pub struct ModuleCall;

// ============================================================================
// Type aliases
// ============================================================================

pub type OrganizationId = Id<Organization>;
pub type EventId = Id<Event>;
pub type TriggerId = Id<Trigger>;
pub type ConditionId = Id<Condition>;
pub type SharedScriptId = Id<SharedScript>;
pub type ProcessId = Id<Process>;
pub type ProcessRequestId = Id<ProcessRequest>;
pub type ProcessLogId = Id<ProcessLog>;
pub type ModuleId = Id<Module>;
pub type ModuleSessionId = Id<ModuleSession>;
pub type CorrelationId = Id<ModuleCall, V4>;
