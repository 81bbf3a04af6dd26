//! Postgres implementation of the collaborator traits.
//!
//! Thin delegation to the domain models, where all SQL lives.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use super::traits::{
    BaseAuditStore, BaseEventStore, BaseModuleDirectory, BaseStorage, BaseTriggerStore,
};
use crate::common::{
    ConditionId, EventId, OrganizationId, ProcessId, ProcessRequestId, TriggerId,
};
use crate::domains::events::Event;
use crate::domains::modules::{Module, ResolvedModule};
use crate::domains::processes::{
    CreateProcessRequest, Process, ProcessEnd, ProcessLog, ProcessRequest, RequestOutcome,
};
use crate::domains::storage::StorageEntry;
use crate::domains::triggers::{MatchedCondition, SharedScript};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BaseTriggerStore for PostgresStore {
    async fn find_matching_conditions(
        &self,
        organization_id: OrganizationId,
        event_name: &str,
    ) -> Result<Vec<MatchedCondition>> {
        MatchedCondition::find_for_event(organization_id, event_name, &self.pool).await
    }

    async fn find_shared_scripts(
        &self,
        organization_id: OrganizationId,
        trigger_path: &str,
    ) -> Result<Vec<SharedScript>> {
        SharedScript::find_for_trigger_path(organization_id, trigger_path, &self.pool).await
    }
}

#[async_trait]
impl BaseAuditStore for PostgresStore {
    async fn create_process(
        &self,
        event_id: EventId,
        trigger_id: TriggerId,
        condition_id: ConditionId,
    ) -> Result<Process> {
        Process::create(event_id, trigger_id, condition_id, &self.pool).await
    }

    async fn mark_executed(&self, process_id: ProcessId) -> Result<()> {
        Process::mark_executed(process_id, &self.pool).await
    }

    async fn finish_process(&self, process_id: ProcessId, end: ProcessEnd) -> Result<bool> {
        Process::finish(process_id, &end, &self.pool).await
    }

    async fn create_process_request(&self, input: CreateProcessRequest) -> Result<ProcessRequest> {
        ProcessRequest::create(input, &self.pool).await
    }

    async fn resolve_process_request(
        &self,
        request_id: ProcessRequestId,
        outcome: RequestOutcome,
    ) -> Result<()> {
        ProcessRequest::record_outcome(request_id, outcome, &self.pool).await
    }

    async fn append_process_log(&self, process_id: ProcessId, log: JsonValue) -> Result<()> {
        ProcessLog::append(process_id, log, &self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BaseStorage for PostgresStore {
    async fn get(&self, organization_id: OrganizationId, key: &str) -> Result<Option<JsonValue>> {
        StorageEntry::get(organization_id, key, &self.pool).await
    }

    async fn set(
        &self,
        organization_id: OrganizationId,
        key: &str,
        value: JsonValue,
    ) -> Result<JsonValue> {
        StorageEntry::set(organization_id, key, value, &self.pool).await
    }
}

#[async_trait]
impl BaseModuleDirectory for PostgresStore {
    async fn find_module(
        &self,
        organization_id: OrganizationId,
        name_or_code: &str,
    ) -> Result<Option<ResolvedModule>> {
        Module::resolve(organization_id, name_or_code, &self.pool).await
    }
}

#[async_trait]
impl BaseEventStore for PostgresStore {
    async fn claim_event(&self, event_id: EventId) -> Result<Option<Event>> {
        Event::claim(event_id, &self.pool).await
    }

    async fn complete_event(&self, event_id: EventId) -> Result<bool> {
        Event::complete(event_id, &self.pool).await
    }
}
