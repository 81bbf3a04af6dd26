//! In-memory engine fixtures.
//!
//! `TestEngine` wires the in-memory store, the NATS double and the module
//! registry into a dispatcher, and creates triggers, conditions and events
//! for one organization.

#![allow(dead_code)]

use engine_core::common::{OrganizationId, ProcessId};
use engine_core::config::EngineSettings;
use engine_core::domains::events::{CreateEvent, Event};
use engine_core::domains::processes::Process;
use engine_core::domains::triggers::{
    Condition, CreateCondition, CreateSharedScript, CreateTrigger, SharedScript, Trigger,
};
use engine_core::engine::{AttemptOutcome, Dispatched, Dispatcher};
use engine_core::kernel::{BaseEventStore, EngineDeps, TestDependencies, TestNats};
use serde_json::Value as JsonValue;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct TestEngine {
    pub deps: TestDependencies,
    pub engine: EngineDeps,
    pub dispatcher: Dispatcher,
    pub org: OrganizationId,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with(TestDependencies::new(), EngineSettings::default())
    }

    pub fn with_nats(nats: TestNats) -> Self {
        Self::with(TestDependencies::new().mock_nats(nats), EngineSettings::default())
    }

    pub fn with(deps: TestDependencies, settings: EngineSettings) -> Self {
        init_tracing();
        let engine = deps.into_deps(settings);
        let dispatcher = Dispatcher::new(engine.clone());
        Self {
            deps,
            engine,
            dispatcher,
            org: OrganizationId::new(),
        }
    }

    pub fn trigger(&self, name: &str, code: &str) -> Trigger {
        self.trigger_on_channel(name, code, None)
    }

    pub fn trigger_on_channel(&self, name: &str, code: &str, channel: Option<&str>) -> Trigger {
        self.deps.store.add_trigger(CreateTrigger {
            organization_id: self.org,
            name: name.to_string(),
            code: code.to_string(),
            enable: true,
            channel: channel.map(str::to_string),
        })
    }

    pub fn condition(&self, trigger: &Trigger, event_name: &str, code: &str) -> Condition {
        self.scheduled_condition(trigger, event_name, code, "BASIC", 0)
    }

    pub fn scheduled_condition(
        &self,
        trigger: &Trigger,
        event_name: &str,
        code: &str,
        kind: &str,
        timeout_ms: i64,
    ) -> Condition {
        self.deps.store.add_condition(CreateCondition {
            trigger_id: trigger.id,
            name: event_name.to_string(),
            code: code.to_string(),
            kind: kind.to_string(),
            timeout: timeout_ms,
            enable: true,
        })
    }

    pub fn shared(&self, name: &str, code: &str) -> SharedScript {
        self.deps.store.add_shared_script(CreateSharedScript {
            organization_id: self.org,
            name: name.to_string(),
            code: code.to_string(),
            enable: true,
        })
    }

    /// Stores a queued event and claims it the way the consumer does.
    pub async fn emit(&self, name: &str, payload: JsonValue) -> Event {
        let event = self.deps.store.add_event(CreateEvent {
            organization_id: self.org,
            name: name.to_string(),
            payload,
            emitter_code: "panel".to_string(),
            emitter_name: "Front panel".to_string(),
        });
        self.deps
            .store
            .claim_event(event.id)
            .await
            .unwrap()
            .expect("fresh event should be claimable")
    }

    pub async fn dispatch(&self, name: &str, payload: JsonValue) -> (Event, Dispatched) {
        let event = self.emit(name, payload).await;
        let dispatched = self.dispatcher.dispatch(event.clone()).await.unwrap();
        (event, dispatched)
    }

    /// Dispatches and waits for every attempt of the event.
    pub async fn run(&self, name: &str, payload: JsonValue) -> (Event, Vec<AttemptOutcome>) {
        let (event, dispatched) = self.dispatch(name, payload).await;
        (event, dispatched.join().await)
    }

    pub fn process(&self, process_id: ProcessId) -> Process {
        self.deps.store.process(process_id).expect("process should exist")
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
