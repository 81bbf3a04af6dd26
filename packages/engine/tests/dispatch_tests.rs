//! Dispatcher and attempt pipeline tests against the in-memory store.

mod common;

use common::*;
use engine_core::common::subjects;
use engine_core::domains::events::EventStatus;
use engine_core::domains::triggers::CreateTrigger;
use engine_core::engine::AttemptOutcome;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn event_without_matching_condition_creates_no_process() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/lights/on", "log('on')");
    engine.condition(&trigger, "click", "true");

    let (event, outcomes) = engine.run("hover", json!({})).await;

    assert!(outcomes.is_empty());
    assert!(engine.deps.store.processes().is_empty());
    assert_eq!(engine.deps.store.event_status(event.id), Some(EventStatus::Done));
}

#[tokio::test]
async fn truthy_condition_runs_reaction() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/buttons/one", "storage.set('pressed', event.payload.slug)");
    engine.condition(&trigger, "click", "event.payload.slug == 'btn-1'");

    let (event, outcomes) = engine.run("click", json!({"slug": "btn-1"})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    let processes = engine.deps.store.processes_for_event(event.id);
    assert_eq!(processes.len(), 1);
    let process = &processes[0];
    assert!(process.executed);
    assert!(process.start_at.is_some());
    assert!(process.end_at.is_some());
    assert_eq!(process.error, None);
    assert_eq!(
        engine.deps.store.storage_value(engine.org, "pressed"),
        Some(json!("btn-1"))
    );
}

#[tokio::test]
async fn falsy_condition_stops_without_error() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/buttons/one", "storage.set('pressed', true)");
    engine.condition(&trigger, "click", "event.payload.slug == 'btn-1'");

    let (event, outcomes) = engine.run("click", json!({"slug": "btn-2"})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::ConditionFalse]);
    let process = &engine.deps.store.processes_for_event(event.id)[0];
    assert!(!process.executed);
    assert!(process.end_at.is_some());
    assert_eq!(process.error, None);
    assert!(engine.deps.store.storage_calls().is_empty());
}

#[tokio::test]
async fn condition_error_never_runs_reaction() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/buttons/one", "storage.set('pressed', true)");
    engine.condition(&trigger, "click", "error('bad condition')");

    let (event, outcomes) = engine.run("click", json!({})).await;

    assert!(matches!(&outcomes[0], AttemptOutcome::ConditionFailed(e) if e.contains("bad condition")));
    let process = &engine.deps.store.processes_for_event(event.id)[0];
    assert!(!process.executed);
    assert!(process.error.as_deref().unwrap_or_default().contains("bad condition"));
    assert!(engine.deps.store.storage_calls().is_empty());
}

#[tokio::test]
async fn reaction_error_is_recorded_as_executed() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/buttons/one", "local x = nil\nreturn x.field");
    engine.condition(&trigger, "click", "true");

    let (event, outcomes) = engine.run("click", json!({})).await;

    assert!(matches!(&outcomes[0], AttemptOutcome::ExecutedWithError(_)));
    let process = &engine.deps.store.processes_for_event(event.id)[0];
    assert!(process.executed);
    assert!(process.error.is_some());
}

#[tokio::test]
async fn unknown_condition_type_fails_the_attempt() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/buttons/one", "storage.set('pressed', true)");
    engine.scheduled_condition(&trigger, "click", "true", "SOMETIMES", 100);

    let (event, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(
        outcomes,
        vec![AttemptOutcome::Aborted(
            "unknown trigger condition type : SOMETIMES".to_string()
        )]
    );
    let process = &engine.deps.store.processes_for_event(event.id)[0];
    assert!(!process.executed);
    assert_eq!(
        process.error.as_deref(),
        Some("unknown trigger condition type : SOMETIMES")
    );
    assert!(engine.deps.store.storage_calls().is_empty());
}

#[tokio::test]
async fn each_matching_condition_gets_its_own_process() {
    let engine = TestEngine::new();
    let first = engine.trigger("/a", "log('a')");
    let second = engine.trigger("/b", "log('b')");
    engine.condition(&first, "click", "true");
    engine.condition(&second, "click", "false");
    engine.condition(&second, "hover", "true");

    let (event, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.contains(&AttemptOutcome::Executed));
    assert!(outcomes.contains(&AttemptOutcome::ConditionFalse));
    assert_eq!(engine.deps.store.processes_for_event(event.id).len(), 2);
}

#[tokio::test]
async fn disabled_and_foreign_triggers_do_not_match() {
    let engine = TestEngine::new();
    let disabled = engine.deps.store.add_trigger(CreateTrigger {
        organization_id: engine.org,
        name: "/disabled".to_string(),
        code: "log('x')".to_string(),
        enable: false,
        channel: None,
    });
    engine.condition(&disabled, "click", "true");
    let foreign = engine.deps.store.add_trigger(CreateTrigger {
        organization_id: engine_core::common::OrganizationId::new(),
        name: "/foreign".to_string(),
        code: "log('x')".to_string(),
        enable: true,
        channel: None,
    });
    engine.condition(&foreign, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert!(outcomes.is_empty());
    assert!(engine.deps.store.processes().is_empty());
}

#[tokio::test]
async fn failing_process_creation_skips_only_that_match() {
    let engine = TestEngine::new();
    let broken = engine.trigger("/broken", "storage.set('broken', true)");
    let healthy = engine.trigger("/healthy", "storage.set('healthy', true)");
    engine.condition(&broken, "click", "true");
    engine.condition(&healthy, "click", "true");
    engine.deps.store.fail_process_creation_for(broken.id);

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    assert_eq!(engine.deps.store.storage_value(engine.org, "healthy"), Some(json!(true)));
    assert_eq!(engine.deps.store.storage_value(engine.org, "broken"), None);
}

#[tokio::test]
async fn shared_scripts_from_ancestor_directories_are_loaded() {
    let engine = TestEngine::new();
    engine.shared("/helpers", "function double(n) return n * 2 end");
    engine.shared("/lights/colors", "DEFAULT_COLOR = 'red'");
    engine.shared("/sound/volume", "error('not an ancestor')");
    let trigger = engine.trigger(
        "/lights/colors/set",
        "storage.set('result', { value = double(event.payload.n), color = DEFAULT_COLOR })",
    );
    engine.condition(&trigger, "click", "double(1) == 2");

    let (_, outcomes) = engine.run("click", json!({"n": 21})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    assert_eq!(
        engine.deps.store.storage_value(engine.org, "result"),
        Some(json!({"value": 42, "color": "red"}))
    );
}

#[tokio::test]
async fn failing_shared_script_does_not_abort_attempt() {
    let engine = TestEngine::new();
    engine.shared("/broken", "error('boom')");
    let trigger = engine.trigger("/lights", "storage.set('ran', true)");
    engine.condition(&trigger, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
}

#[tokio::test]
async fn event_is_done_after_its_attempts() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/lights", "log('on')");
    engine.condition(&trigger, "click", "true");

    let (event, _) = engine.run("click", json!({})).await;

    assert_eq!(engine.deps.store.event_status(event.id), Some(EventStatus::Done));
}

#[tokio::test]
async fn progress_pings_follow_process_transitions() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/lights", "storage.set('on', true)");
    engine.condition(&trigger, "click", "true");

    let (event, _) = engine.run("click", json!({})).await;

    let subject = subjects::event_progress(engine.org, event.id);
    // created, executed, finished
    assert_eq!(engine.deps.nats.publish_count_for(&subject), 3);
    assert!(engine.deps.nats.messages_for_subject(&subject)[0].payload.is_empty());
}

#[tokio::test]
async fn log_calls_become_process_logs() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/lights", "log('turning on')\nlog('level', event.payload.level)");
    engine.condition(&trigger, "click", "true");

    let (event, _) = engine.run("click", json!({"level": 3})).await;
    let process_id = engine.deps.store.processes_for_event(event.id)[0].id;

    let store = engine.deps.store.clone();
    assert!(eventually(Duration::from_secs(2), || store.logs_for_process(process_id).len() == 2).await);

    let mut logs: Vec<_> = store
        .logs_for_process(process_id)
        .into_iter()
        .map(|l| l.log)
        .collect();
    logs.sort_by_key(|l| l.to_string());
    assert_eq!(logs, vec![json!("turning on"), json!(["level", 3])]);
}
