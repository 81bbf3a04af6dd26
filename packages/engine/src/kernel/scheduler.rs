//! Throttle and debounce policies, keyed by `trigger_id:condition_name`.
//!
//! Each key owns its own state behind its own mutex. Timers run on separate
//! tasks and release the key's mutex before handing control back to the
//! pipeline, so an event arriving while a deferred run executes never
//! deadlocks on the key.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// What the scheduling policy decided for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Execute,
    Cancelled,
}

/// Deferred work run when a throttle cooldown ends.
pub type TrailingJob = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct ThrottleState {
    last_execution: Option<Instant>,
    generation: u64,
    pending: Option<AbortHandle>,
}

#[derive(Default)]
struct DebounceState {
    generation: u64,
    waiter: Option<oneshot::Sender<Decision>>,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
pub struct Scheduler {
    throttles: Mutex<HashMap<String, Arc<Mutex<ThrottleState>>>>,
    debounces: Mutex<HashMap<String, Arc<Mutex<DebounceState>>>>,
}

fn state_for<S: Default>(map: &Mutex<HashMap<String, Arc<Mutex<S>>>>, key: &str) -> Arc<Mutex<S>> {
    map.lock()
        .unwrap_or_else(|e| e.into_inner())
        .entry(key.to_string())
        .or_default()
        .clone()
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Throttle decision for one call. Never waits.
    ///
    /// Outside the cooldown the call executes and starts a new cooldown.
    /// Inside it the call is cancelled and `trailing` is armed for the end of
    /// the cooldown, displacing any trailing job armed earlier.
    pub fn throttle(&self, key: &str, timeout: Duration, trailing: TrailingJob) -> Decision {
        let state = state_for(&self.throttles, key);
        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let remaining = guard
            .last_execution
            .map(|last| now.duration_since(last))
            .filter(|elapsed| *elapsed < timeout)
            .map(|elapsed| timeout - elapsed);

        guard.generation += 1;
        if let Some(pending) = guard.pending.take() {
            pending.abort();
        }

        let Some(remaining) = remaining else {
            guard.last_execution = Some(now);
            return Decision::Execute;
        };

        let generation = guard.generation;
        let timer_state = state.clone();
        let key_name = key.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            {
                let mut guard = timer_state.lock().unwrap_or_else(|e| e.into_inner());
                if guard.generation != generation {
                    return;
                }
                guard.last_execution = Some(Instant::now());
                guard.pending = None;
            }
            tracing::debug!(key = %key_name, "throttle trailing call firing");
            trailing().await;
        });
        guard.pending = Some(timer.abort_handle());

        Decision::Cancelled
    }

    /// Debounce decision for one call. Resolves once the quiet period after
    /// this call elapses (`Execute`) or a later call supersedes it (`Cancelled`).
    pub async fn debounce(&self, key: &str, timeout: Duration) -> Decision {
        let receiver = self.arm_debounce(key, timeout);
        receiver.await.unwrap_or(Decision::Cancelled)
    }

    fn arm_debounce(&self, key: &str, timeout: Duration) -> oneshot::Receiver<Decision> {
        let state = state_for(&self.debounces, key);
        let (tx, rx) = oneshot::channel();

        let superseded = {
            let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
            guard.generation += 1;
            let generation = guard.generation;

            if let Some(timer) = guard.timer.take() {
                timer.abort();
            }
            let superseded = guard.waiter.replace(tx);

            let timer_state = state.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let waiter = {
                    let mut guard = timer_state.lock().unwrap_or_else(|e| e.into_inner());
                    if guard.generation != generation {
                        return;
                    }
                    guard.timer = None;
                    guard.waiter.take()
                };
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Decision::Execute);
                }
            });
            guard.timer = Some(timer.abort_handle());
            superseded
        };

        if let Some(superseded) = superseded {
            let _ = superseded.send(Decision::Cancelled);
        }
        rx
    }
}
