// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - they read and write records.
// Scheduling, sandboxing and audit decisions live in engine/ and use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseAuditStore, BaseStorage)

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::common::{
    ConditionId, EventId, OrganizationId, ProcessId, ProcessRequestId, TriggerId,
};
use crate::domains::events::Event;
use crate::domains::modules::ResolvedModule;
use crate::domains::processes::{
    CreateProcessRequest, Process, ProcessEnd, ProcessRequest, RequestOutcome,
};
use crate::domains::triggers::{MatchedCondition, SharedScript};

// =============================================================================
// Trigger definitions (read-only)
// =============================================================================

#[async_trait]
pub trait BaseTriggerStore: Send + Sync {
    /// Enabled conditions named `event_name` whose trigger is enabled and
    /// belongs to the organization.
    async fn find_matching_conditions(
        &self,
        organization_id: OrganizationId,
        event_name: &str,
    ) -> Result<Vec<MatchedCondition>>;

    /// Enabled shared scripts living in an ancestor directory of
    /// `trigger_path`, in loading order.
    async fn find_shared_scripts(
        &self,
        organization_id: OrganizationId,
        trigger_path: &str,
    ) -> Result<Vec<SharedScript>>;
}

// =============================================================================
// Audit trail (processes, process requests, process logs)
// =============================================================================

#[async_trait]
pub trait BaseAuditStore: Send + Sync {
    /// Creates a process with `start_at` set.
    async fn create_process(
        &self,
        event_id: EventId,
        trigger_id: TriggerId,
        condition_id: ConditionId,
    ) -> Result<Process>;

    async fn mark_executed(&self, process_id: ProcessId) -> Result<()>;

    /// Applies a terminal transition. Returns false when the process had
    /// already ended; the first transition wins.
    async fn finish_process(&self, process_id: ProcessId, end: ProcessEnd) -> Result<bool>;

    async fn create_process_request(&self, input: CreateProcessRequest) -> Result<ProcessRequest>;

    async fn resolve_process_request(
        &self,
        request_id: ProcessRequestId,
        outcome: RequestOutcome,
    ) -> Result<()>;

    async fn append_process_log(&self, process_id: ProcessId, log: JsonValue) -> Result<()>;
}

// =============================================================================
// Key/value storage
// =============================================================================

#[async_trait]
pub trait BaseStorage: Send + Sync {
    async fn get(&self, organization_id: OrganizationId, key: &str) -> Result<Option<JsonValue>>;

    /// Upserts and returns the stored value.
    async fn set(
        &self,
        organization_id: OrganizationId,
        key: &str,
        value: JsonValue,
    ) -> Result<JsonValue>;
}

// =============================================================================
// Module directory (name -> live session)
// =============================================================================

#[async_trait]
pub trait BaseModuleDirectory: Send + Sync {
    /// Resolves a module by name or code. `Ok(None)` means no such module;
    /// a module without a live session comes back with `session_id: None`.
    async fn find_module(
        &self,
        organization_id: OrganizationId,
        name_or_code: &str,
    ) -> Result<Option<ResolvedModule>>;
}

// =============================================================================
// Event intake
// =============================================================================

#[async_trait]
pub trait BaseEventStore: Send + Sync {
    /// Atomically claims a queued event. `None` if missing or owned by another worker.
    async fn claim_event(&self, event_id: EventId) -> Result<Option<Event>>;

    /// Marks a claimed event done. Returns false if it was not in the claimed state.
    async fn complete_event(&self, event_id: EventId) -> Result<bool>;
}
