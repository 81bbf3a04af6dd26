//! Throttle and debounce behavior through the dispatcher.

mod common;

use common::*;
use engine_core::engine::AttemptOutcome;
use serde_json::json;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn throttle_runs_leading_call_and_one_trailing_call() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/counter", "log(event.payload.n)");
    engine.scheduled_condition(&trigger, "tick", "true", "THROTTLE", 500);

    let mut events = Vec::new();
    let mut outcomes = Vec::new();
    for n in 1..=5 {
        let (event, results) = engine.run("tick", json!({"n": n})).await;
        events.push(event);
        outcomes.extend(results);
    }

    assert_eq!(outcomes[0], AttemptOutcome::Executed);
    assert!(outcomes[1..].iter().all(|o| *o == AttemptOutcome::Cancelled));

    let store = engine.deps.store.clone();
    let executed = || store.processes().iter().filter(|p| p.executed).count();
    assert!(eventually(Duration::from_secs(3), || executed() == 2).await);

    // The trailing run belongs to the last displaced event, under a new process.
    let last = events.last().unwrap();
    let processes = store.processes_for_event(last.id);
    assert_eq!(processes.len(), 2);
    let trailing = processes.iter().find(|p| p.executed).unwrap();
    assert!(eventually(Duration::from_secs(2), || store.logs_for_process(trailing.id).len() == 1).await);
    assert_eq!(store.logs_for_process(trailing.id)[0].log, json!(5));

    // Nothing else fires later.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(executed(), 2);
    assert_eq!(store.processes().len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn throttle_allows_calls_after_cooldown() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/counter", "log('tick')");
    engine.scheduled_condition(&trigger, "tick", "true", "THROTTLE", 100);

    let (_, first) = engine.run("tick", json!({})).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let (_, second) = engine.run("tick", json!({})).await;

    assert_eq!(first, vec![AttemptOutcome::Executed]);
    assert_eq!(second, vec![AttemptOutcome::Executed]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn throttled_attempts_are_stopped_not_failed() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/counter", "log('tick')");
    engine.scheduled_condition(&trigger, "tick", "true", "THROTTLE", 1_000);

    engine.run("tick", json!({})).await;
    let (event, outcomes) = engine.run("tick", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Cancelled]);
    let process = &engine.deps.store.processes_for_event(event.id)[0];
    assert!(!process.executed);
    assert!(process.end_at.is_some());
    assert_eq!(process.error, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn throttle_keys_are_per_condition() {
    let engine = TestEngine::new();
    let first = engine.trigger("/first", "log('first')");
    let second = engine.trigger("/second", "log('second')");
    engine.scheduled_condition(&first, "tick", "true", "THROTTLE", 1_000);
    engine.scheduled_condition(&second, "tick", "true", "THROTTLE", 1_000);

    let (_, outcomes) = engine.run("tick", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed, AttemptOutcome::Executed]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debounce_runs_only_the_last_call() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/search", "log(event.payload.q)");
    engine.scheduled_condition(&trigger, "typed", "true", "DEBOUNCE", 200);

    let mut batches = Vec::new();
    for q in ["h", "he", "hel"] {
        batches.push(engine.dispatch("typed", json!({"q": q})).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    let mut outcomes = Vec::new();
    let mut last_event = None;
    for (event, dispatched) in batches {
        outcomes.extend(dispatched.join().await);
        last_event = Some(event);
    }

    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Cancelled,
            AttemptOutcome::Cancelled,
            AttemptOutcome::Executed
        ]
    );

    let store = engine.deps.store.clone();
    let process = &store.processes_for_event(last_event.unwrap().id)[0];
    assert!(eventually(Duration::from_secs(2), || store.logs_for_process(process.id).len() == 1).await);
    assert_eq!(store.logs_for_process(process.id)[0].log, json!("hel"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debounce_waits_for_the_quiet_period() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/search", "log('run')");
    engine.scheduled_condition(&trigger, "typed", "true", "DEBOUNCE", 150);

    let started = tokio::time::Instant::now();
    let (_, outcomes) = engine.run("typed", json!({})).await;

    assert_eq!(outcomes, vec![AttemptOutcome::Executed]);
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debounce_calls_separated_by_quiet_periods_all_run() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/search", "log('run')");
    engine.scheduled_condition(&trigger, "typed", "true", "DEBOUNCE", 50);

    let (_, first) = engine.run("typed", json!({})).await;
    let (_, second) = engine.run("typed", json!({})).await;

    assert_eq!(first, vec![AttemptOutcome::Executed]);
    assert_eq!(second, vec![AttemptOutcome::Executed]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn superseded_debounce_call_is_stopped() {
    let engine = TestEngine::new();
    let trigger = engine.trigger("/search", "log('run')");
    engine.scheduled_condition(&trigger, "typed", "true", "DEBOUNCE", 150);

    let (first_event, first) = engine.dispatch("typed", json!({})).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    let (_, second) = engine.dispatch("typed", json!({})).await;

    assert_eq!(first.join().await, vec![AttemptOutcome::Cancelled]);
    assert_eq!(second.join().await, vec![AttemptOutcome::Executed]);
    let process = &engine.deps.store.processes_for_event(first_event.id)[0];
    assert!(!process.executed);
}
