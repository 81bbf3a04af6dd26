// TestDependencies - in-memory implementations for testing
//
// Provides an in-memory store standing in for Postgres, plus the TestNats
// double and a module registry, wired into EngineDeps for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    BaseAuditStore, BaseEventStore, BaseModuleDirectory, BaseStorage, BaseTriggerStore,
    EngineDeps, ModuleSessionRegistry, TestNats,
};
use crate::common::{
    ConditionId, EventId, OrganizationId, ProcessId, ProcessRequestId, SharedScriptId, TriggerId,
};
use crate::config::EngineSettings;
use crate::domains::events::{CreateEvent, Event, EventStatus};
use crate::domains::processes::{
    CreateProcessRequest, Process, ProcessEnd, ProcessLog, ProcessRequest, RequestOutcome,
};
use crate::domains::triggers::{
    Condition, CreateCondition, CreateSharedScript, CreateTrigger, MatchedCondition,
    SharedScript, Trigger,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A storage call seen by the in-memory store.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageCall {
    Get { key: String },
    Set { key: String, value: JsonValue },
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
pub struct InMemoryStore {
    triggers: Mutex<Vec<Trigger>>,
    conditions: Mutex<Vec<Condition>>,
    shared: Mutex<Vec<SharedScript>>,
    events: Mutex<HashMap<EventId, (Event, EventStatus)>>,
    processes: Mutex<Vec<Process>>,
    requests: Mutex<Vec<ProcessRequest>>,
    logs: Mutex<Vec<ProcessLog>>,
    storage: Mutex<HashMap<(OrganizationId, String), JsonValue>>,
    storage_calls: Mutex<Vec<StorageCall>>,
    failing_process_triggers: Mutex<HashSet<TriggerId>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trigger(&self, input: CreateTrigger) -> Trigger {
        let trigger = Trigger {
            id: TriggerId::new(),
            organization_id: input.organization_id,
            name: input.name,
            code: input.code,
            enable: input.enable,
            channel: input.channel,
            created_at: Utc::now(),
        };
        locked(&self.triggers).push(trigger.clone());
        trigger
    }

    pub fn add_condition(&self, input: CreateCondition) -> Condition {
        let condition = Condition {
            id: ConditionId::new(),
            trigger_id: input.trigger_id,
            name: input.name,
            code: input.code,
            kind: input.kind,
            timeout: input.timeout,
            enable: input.enable,
            created_at: Utc::now(),
        };
        locked(&self.conditions).push(condition.clone());
        condition
    }

    pub fn add_shared_script(&self, input: CreateSharedScript) -> SharedScript {
        let script = SharedScript {
            id: SharedScriptId::new(),
            organization_id: input.organization_id,
            name: input.name,
            code: input.code,
            enable: input.enable,
            created_at: Utc::now(),
        };
        locked(&self.shared).push(script.clone());
        script
    }

    /// Records a queued event.
    pub fn add_event(&self, input: CreateEvent) -> Event {
        let event = Event {
            id: EventId::new(),
            organization_id: input.organization_id,
            name: input.name,
            payload: input.payload,
            emitter_code: input.emitter_code,
            emitter_name: input.emitter_name,
            emitted_at: Utc::now(),
        };
        locked(&self.events).insert(event.id, (event.clone(), EventStatus::Queued));
        event
    }

    pub fn event_status(&self, event_id: EventId) -> Option<EventStatus> {
        locked(&self.events).get(&event_id).map(|(_, status)| *status)
    }

    /// Makes `create_process` fail for this trigger.
    pub fn fail_process_creation_for(&self, trigger_id: TriggerId) {
        locked(&self.failing_process_triggers).insert(trigger_id);
    }

    pub fn put_storage(&self, organization_id: OrganizationId, key: &str, value: JsonValue) {
        locked(&self.storage).insert((organization_id, key.to_string()), value);
    }

    pub fn storage_value(&self, organization_id: OrganizationId, key: &str) -> Option<JsonValue> {
        locked(&self.storage)
            .get(&(organization_id, key.to_string()))
            .cloned()
    }

    pub fn storage_calls(&self) -> Vec<StorageCall> {
        locked(&self.storage_calls).clone()
    }

    pub fn processes(&self) -> Vec<Process> {
        locked(&self.processes).clone()
    }

    pub fn processes_for_event(&self, event_id: EventId) -> Vec<Process> {
        locked(&self.processes)
            .iter()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect()
    }

    pub fn process(&self, process_id: ProcessId) -> Option<Process> {
        locked(&self.processes)
            .iter()
            .find(|p| p.id == process_id)
            .cloned()
    }

    pub fn process_requests(&self) -> Vec<ProcessRequest> {
        locked(&self.requests).clone()
    }

    pub fn requests_for_process(&self, process_id: ProcessId) -> Vec<ProcessRequest> {
        locked(&self.requests)
            .iter()
            .filter(|r| r.process_id == process_id)
            .cloned()
            .collect()
    }

    pub fn logs_for_process(&self, process_id: ProcessId) -> Vec<ProcessLog> {
        locked(&self.logs)
            .iter()
            .filter(|l| l.process_id == process_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BaseTriggerStore for InMemoryStore {
    async fn find_matching_conditions(
        &self,
        organization_id: OrganizationId,
        event_name: &str,
    ) -> Result<Vec<MatchedCondition>> {
        let triggers = locked(&self.triggers);
        let conditions = locked(&self.conditions);
        Ok(conditions
            .iter()
            .filter(|c| c.enable && c.name == event_name)
            .filter_map(|c| {
                triggers
                    .iter()
                    .find(|t| t.id == c.trigger_id && t.enable && t.organization_id == organization_id)
                    .map(|t| MatchedCondition::from_parts(t, c))
            })
            .collect())
    }

    async fn find_shared_scripts(
        &self,
        organization_id: OrganizationId,
        trigger_path: &str,
    ) -> Result<Vec<SharedScript>> {
        let mut scripts: Vec<SharedScript> = locked(&self.shared)
            .iter()
            .filter(|s| s.organization_id == organization_id && s.enable && s.applies_to(trigger_path))
            .cloned()
            .collect();
        SharedScript::sort_for_loading(&mut scripts);
        Ok(scripts)
    }
}

#[async_trait]
impl BaseAuditStore for InMemoryStore {
    async fn create_process(
        &self,
        event_id: EventId,
        trigger_id: TriggerId,
        condition_id: ConditionId,
    ) -> Result<Process> {
        if locked(&self.failing_process_triggers).contains(&trigger_id) {
            return Err(anyhow!("process table unavailable"));
        }
        let process = Process {
            id: ProcessId::new(),
            event_id,
            trigger_id,
            condition_id: Some(condition_id),
            start_at: Some(Utc::now()),
            end_at: None,
            executed: false,
            error: None,
        };
        locked(&self.processes).push(process.clone());
        Ok(process)
    }

    async fn mark_executed(&self, process_id: ProcessId) -> Result<()> {
        if let Some(process) = locked(&self.processes)
            .iter_mut()
            .find(|p| p.id == process_id && p.end_at.is_none())
        {
            process.executed = true;
        }
        Ok(())
    }

    async fn finish_process(&self, process_id: ProcessId, end: ProcessEnd) -> Result<bool> {
        let mut processes = locked(&self.processes);
        let process = processes
            .iter_mut()
            .find(|p| p.id == process_id)
            .ok_or_else(|| anyhow!("process {} not found", process_id))?;
        if process.end_at.is_some() {
            return Ok(false);
        }
        process.end_at = Some(Utc::now());
        process.executed |= end.executed();
        process.error = end.error().map(str::to_string);
        Ok(true)
    }

    async fn create_process_request(&self, input: CreateProcessRequest) -> Result<ProcessRequest> {
        let request = ProcessRequest::new(input);
        locked(&self.requests).push(request.clone());
        Ok(request)
    }

    async fn resolve_process_request(
        &self,
        request_id: ProcessRequestId,
        outcome: RequestOutcome,
    ) -> Result<()> {
        let mut requests = locked(&self.requests);
        let request = requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or_else(|| anyhow!("process request {} not found", request_id))?;
        request.resolve(outcome);
        Ok(())
    }

    async fn append_process_log(&self, process_id: ProcessId, log: JsonValue) -> Result<()> {
        locked(&self.logs).push(ProcessLog::new(process_id, log));
        Ok(())
    }
}

#[async_trait]
impl BaseStorage for InMemoryStore {
    async fn get(&self, organization_id: OrganizationId, key: &str) -> Result<Option<JsonValue>> {
        locked(&self.storage_calls).push(StorageCall::Get {
            key: key.to_string(),
        });
        Ok(self.storage_value(organization_id, key))
    }

    async fn set(
        &self,
        organization_id: OrganizationId,
        key: &str,
        value: JsonValue,
    ) -> Result<JsonValue> {
        locked(&self.storage_calls).push(StorageCall::Set {
            key: key.to_string(),
            value: value.clone(),
        });
        self.put_storage(organization_id, key, value.clone());
        Ok(value)
    }
}

#[async_trait]
impl BaseEventStore for InMemoryStore {
    async fn claim_event(&self, event_id: EventId) -> Result<Option<Event>> {
        let mut events = locked(&self.events);
        match events.get_mut(&event_id) {
            Some((event, status)) if *status == EventStatus::Queued => {
                *status = EventStatus::Consumed;
                Ok(Some(event.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_event(&self, event_id: EventId) -> Result<bool> {
        let mut events = locked(&self.events);
        match events.get_mut(&event_id) {
            Some((_, status)) if *status == EventStatus::Consumed => {
                *status = EventStatus::Done;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

pub struct TestDependencies {
    pub store: Arc<InMemoryStore>,
    pub nats: Arc<TestNats>,
    pub modules: Arc<ModuleSessionRegistry>,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            nats: Arc::new(TestNats::new()),
            modules: Arc::new(ModuleSessionRegistry::new()),
        }
    }

    /// Set a NATS double with a scripted responder
    pub fn mock_nats(mut self, nats: TestNats) -> Self {
        self.nats = Arc::new(nats);
        self
    }

    /// Wire everything into EngineDeps
    pub fn into_deps(&self, settings: EngineSettings) -> EngineDeps {
        let modules: Arc<dyn BaseModuleDirectory> = self.modules.clone();
        EngineDeps::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            modules,
            self.store.clone(),
            self.nats.clone(),
            settings,
        )
    }
}

