//! Module request/notify from reaction scripts, through the bridge and the
//! NATS double.

mod common;

use bytes::Bytes;
use common::*;
use engine_core::common::subjects;
use engine_core::config::EngineSettings;
use engine_core::domains::processes::ProcessRequest;
use engine_core::engine::AttemptOutcome;
use engine_core::kernel::{TestDependencies, TestNats};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

fn reply(value: JsonValue) -> Option<Bytes> {
    Some(Bytes::from(serde_json::to_vec(&value).unwrap()))
}

async fn settled_requests(engine: &TestEngine, count: usize) -> Vec<ProcessRequest> {
    let store = engine.deps.store.clone();
    let settled = eventually(Duration::from_secs(2), || {
        let requests = store.process_requests();
        requests.len() == count && requests.iter().all(|r| r.response_date.is_some())
    })
    .await;
    assert!(settled, "process requests never settled");
    store.process_requests()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn click_notifies_board_module() {
    let engine = TestEngine::new();
    let module_id = engine.deps.modules.register_module(engine.org, "board", "board");
    let session_id = engine.deps.modules.open_session(module_id).unwrap();
    let trigger = engine.trigger(
        "/buttons/btn-1",
        "module.notify('board', 'updateText', { text = 'x' })",
    );
    engine.condition(&trigger, "click", "event.payload.slug == 'btn-1'");

    let (event, outcomes) = engine.run("click", json!({"slug": "btn-1"})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    let process = &engine.deps.store.processes_for_event(event.id)[0];
    assert!(process.executed);
    assert_eq!(process.error, None);

    let requests = settled_requests(&engine, 1).await;
    let request = &requests[0];
    assert!(request.notification);
    assert_eq!(request.method, "updateText");
    assert_eq!(request.module_id, Some(module_id));
    assert_eq!(request.params, Some(json!({"text": "x"})));
    assert_eq!(request.error, None);

    let subject = subjects::module_session(engine.org, session_id);
    let sent = engine.deps.nats.messages_for_subject(&subject);
    assert_eq!(sent.len(), 1);
    let body: JsonValue = engine.deps.nats.deserialize_message(&sent[0]).unwrap();
    assert_eq!(
        body,
        json!({
            "type": "module",
            "action": "notify",
            "payload": {"method": "updateText", "params": {"text": "x"}}
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_returns_module_result_to_script() {
    let nats = TestNats::new().with_responder(|_, _| reply(json!({"success": {"level": 4}})));
    let engine = TestEngine::with_nats(nats);
    let module_id = engine.deps.modules.register_module(engine.org, "Lamp", "lamp-01");
    let session_id = engine.deps.modules.open_session(module_id).unwrap();
    let trigger = engine.trigger(
        "/lamp/status",
        "local status = module.request('lamp-01', 'status', { verbose = true })\nstorage.set('level', status.level)",
    );
    engine.condition(&trigger, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    assert_eq!(engine.deps.store.storage_value(engine.org, "level"), Some(json!(4)));

    let requests = settled_requests(&engine, 1).await;
    assert!(!requests[0].notification);
    assert_eq!(requests[0].method, "status");
    assert_eq!(requests[0].result, Some(json!({"level": 4})));
    assert_eq!(requests[0].error, None);

    let subject = subjects::module_session(engine.org, session_id);
    let sent = engine.deps.nats.messages_for_subject(&subject);
    let body: JsonValue = engine.deps.nats.deserialize_message(&sent[0]).unwrap();
    assert_eq!(body["action"], json!("request"));
    assert_eq!(body["payload"]["params"], json!({"verbose": true}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn module_error_reply_fails_the_reaction() {
    let nats = TestNats::new().with_responder(|_, _| reply(json!({"error": "unknown method"})));
    let engine = TestEngine::with_nats(nats);
    let module_id = engine.deps.modules.register_module(engine.org, "lamp", "lamp");
    engine.deps.modules.open_session(module_id);
    let trigger = engine.trigger("/lamp", "module.request('lamp', 'explode', {})\nstorage.set('after', true)");
    engine.condition(&trigger, "click", "true");

    let (event, outcomes) = engine.run("click", json!({})).await;

    assert!(matches!(&outcomes[0], AttemptOutcome::ExecutedWithError(e) if e.contains("unknown method")));
    let process = &engine.deps.store.processes_for_event(event.id)[0];
    assert!(process.executed);
    assert_eq!(engine.deps.store.storage_value(engine.org, "after"), None);

    let requests = settled_requests(&engine, 1).await;
    assert_eq!(requests[0].error, Some(json!("unknown method")));
    assert_eq!(requests[0].result, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_to_disconnected_module_raises_and_is_recorded() {
    let engine = TestEngine::new();
    let module_id = engine.deps.modules.register_module(engine.org, "lamp", "lamp");
    let trigger = engine.trigger("/lamp", "module.request('lamp', 'status', {})");
    engine.condition(&trigger, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(
        outcomes,
        vec![AttemptOutcome::ExecutedWithError("no module connected: lamp".to_string())]
    );
    let requests = settled_requests(&engine, 1).await;
    assert!(!requests[0].notification);
    assert_eq!(requests[0].module_id, Some(module_id));
    assert_eq!(requests[0].error, Some(json!("no module connected")));
    assert!(engine
        .deps
        .nats
        .messages_with_prefix(&format!("organization.{}.module.", engine.org))
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_to_unknown_module_is_recorded_without_module() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/lamp", "module.request('ghost', 'status', {})");
    engine.condition(&trigger, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(
        outcomes,
        vec![AttemptOutcome::ExecutedWithError("no module connected: ghost".to_string())]
    );
    let requests = settled_requests(&engine, 1).await;
    assert_eq!(requests[0].module_id, None);
    assert_eq!(requests[0].error, Some(json!("no module connected")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_times_out() {
    let settings = EngineSettings {
        module_request_timeout: Duration::from_millis(50),
        ..EngineSettings::default()
    };
    let engine = TestEngine::with(TestDependencies::new(), settings);
    let module_id = engine.deps.modules.register_module(engine.org, "lamp", "lamp");
    engine.deps.modules.open_session(module_id);
    let trigger = engine.trigger("/lamp", "module.request('lamp', 'status', {})");
    engine.condition(&trigger, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(
        outcomes,
        vec![AttemptOutcome::ExecutedWithError("request timed out after 50ms".to_string())]
    );
    let requests = settled_requests(&engine, 1).await;
    assert_eq!(requests[0].error, Some(json!("request timed out after 50ms")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notify_failures_never_reach_the_script() {
    let engine = TestEngine::new();
    let trigger = engine.trigger(
        "/board",
        "module.notify('board', 'updateText', { text = 'x' })\nstorage.set('after', true)",
    );
    engine.condition(&trigger, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    assert_eq!(engine.deps.store.storage_value(engine.org, "after"), Some(json!(true)));
    let requests = settled_requests(&engine, 1).await;
    assert!(requests[0].notification);
    assert_eq!(requests[0].error, Some(json!("no module connected")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn script_can_recover_from_failed_request() {
    let engine = TestEngine::new();
    let trigger = engine.trigger(
        "/lamp",
        "local ok, err = pcall(module.request, 'lamp', 'status', {})\nstorage.set('outcome', { ok = ok, err = tostring(err) })",
    );
    engine.condition(&trigger, "click", "true");

    let (_, outcomes) = engine.run("click", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    let outcome = engine.deps.store.storage_value(engine.org, "outcome").unwrap();
    assert_eq!(outcome["ok"], json!(false));
    assert!(outcome["err"].as_str().unwrap().contains("no module connected"));
}
