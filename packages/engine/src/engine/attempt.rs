//! One processing attempt: scheduling policy, condition, reaction and the
//! terminal audit transition.

use futures::FutureExt;
use std::sync::Arc;
use tokio::runtime::Handle;

use super::{publish_progress, AttemptHost};
use crate::common::ProcessId;
use crate::domains::events::Event;
use crate::domains::processes::{Process, ProcessEnd};
use crate::domains::triggers::{ConditionKind, MatchedCondition, SharedScript};
use crate::kernel::{CallContext, Decision, EngineDeps, TrailingJob};
use crate::sandbox::Sandbox;

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Superseded by the throttle or debounce policy.
    Cancelled,
    ConditionFalse,
    ConditionFailed(String),
    Executed,
    ExecutedWithError(String),
    /// Never reached the condition: unknown condition type, sandbox setup
    /// failure or a crashed script task.
    Aborted(String),
}

impl AttemptOutcome {
    pub fn process_end(&self) -> ProcessEnd {
        match self {
            AttemptOutcome::Cancelled | AttemptOutcome::ConditionFalse => ProcessEnd::Stopped,
            AttemptOutcome::ConditionFailed(error) | AttemptOutcome::Aborted(error) => {
                ProcessEnd::Failed {
                    error: error.clone(),
                }
            }
            AttemptOutcome::Executed => ProcessEnd::Executed,
            AttemptOutcome::ExecutedWithError(error) => ProcessEnd::ExecutedWithError {
                error: error.clone(),
            },
        }
    }
}

pub struct Attempt {
    deps: EngineDeps,
    event: Arc<Event>,
    matched: Arc<MatchedCondition>,
    process: Process,
}

impl Attempt {
    pub fn new(
        deps: EngineDeps,
        event: Arc<Event>,
        matched: Arc<MatchedCondition>,
        process: Process,
    ) -> Self {
        Self {
            deps,
            event,
            matched,
            process,
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process.id
    }

    /// Runs the attempt to its terminal transition.
    pub async fn run(self) -> AttemptOutcome {
        let outcome = match self.matched.kind() {
            Err(e) => AttemptOutcome::Aborted(e.to_string()),
            Ok(kind) => match self.schedule(kind).await {
                Decision::Execute => self.evaluate().await,
                Decision::Cancelled => AttemptOutcome::Cancelled,
            },
        };
        self.finish(outcome).await
    }

    async fn schedule(&self, kind: ConditionKind) -> Decision {
        let key = self.matched.scheduling_key();
        let timeout = self.matched.timeout();
        match kind {
            ConditionKind::Basic => Decision::Execute,
            ConditionKind::Throttle => {
                let trailing = trailing_job(
                    self.deps.clone(),
                    self.event.clone(),
                    self.matched.clone(),
                );
                self.deps.scheduler.throttle(&key, timeout, trailing)
            }
            ConditionKind::Debounce => self.deps.scheduler.debounce(&key, timeout).await,
        }
    }

    /// Loads shared scripts, evaluates the condition and, when it holds,
    /// runs the reaction under the trigger's channel.
    async fn evaluate(&self) -> AttemptOutcome {
        let shared = match self
            .deps
            .triggers
            .find_shared_scripts(self.event.organization_id, &self.matched.trigger_name)
            .await
        {
            Ok(scripts) => scripts,
            Err(e) => {
                tracing::warn!(trigger = %self.matched.trigger_name, error = %e, "failed to load shared scripts");
                Vec::new()
            }
        };

        let handle = Handle::current();
        let deps = self.deps.clone();
        let event = self.event.clone();
        let matched = self.matched.clone();
        let process_id = self.process.id;
        let task = tokio::task::spawn_blocking(move || {
            run_scripts(handle, deps, &event, &matched, process_id, &shared)
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => AttemptOutcome::Aborted(format!("script task failed: {}", e)),
        }
    }

    async fn finish(&self, outcome: AttemptOutcome) -> AttemptOutcome {
        let process_id = self.process.id;
        match self
            .deps
            .audit
            .finish_process(process_id, outcome.process_end())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(process_id = %process_id, "process already ended"),
            Err(e) => {
                tracing::error!(process_id = %process_id, error = %e, "failed to record process end")
            }
        }
        publish_progress(
            self.deps.nats.as_ref(),
            self.event.organization_id,
            self.event.id,
        )
        .await;

        match self.deps.events.complete_event(self.event.id).await {
            Ok(true) => tracing::debug!(event_id = %self.event.id, "event done"),
            Ok(false) => {}
            Err(e) => tracing::warn!(event_id = %self.event.id, error = %e, "failed to complete event"),
        }

        let trigger = &self.matched.trigger_name;
        let condition = &self.matched.condition_name;
        match &outcome {
            AttemptOutcome::Cancelled => {
                tracing::debug!(process_id = %process_id, trigger = %trigger, condition = %condition, "attempt superseded")
            }
            AttemptOutcome::ConditionFalse => {
                tracing::debug!(process_id = %process_id, trigger = %trigger, condition = %condition, "condition false")
            }
            AttemptOutcome::ConditionFailed(error) => {
                tracing::warn!(process_id = %process_id, trigger = %trigger, condition = %condition, error = %error, "condition failed")
            }
            AttemptOutcome::Executed => {
                tracing::info!(process_id = %process_id, trigger = %trigger, condition = %condition, "reaction finished")
            }
            AttemptOutcome::ExecutedWithError(error) => {
                tracing::warn!(process_id = %process_id, trigger = %trigger, condition = %condition, error = %error, "reaction failed")
            }
            AttemptOutcome::Aborted(error) => {
                tracing::error!(process_id = %process_id, trigger = %trigger, condition = %condition, error = %error, "attempt aborted")
            }
        }
        outcome
    }
}

/// Deferred throttle call. The displaced attempt's process is already
/// stopped, so the trailing run gets a process of its own.
fn trailing_job(deps: EngineDeps, event: Arc<Event>, matched: Arc<MatchedCondition>) -> TrailingJob {
    Box::new(move || {
        async move {
            let process = match deps
                .audit
                .create_process(event.id, matched.trigger_id, matched.condition_id)
                .await
            {
                Ok(process) => process,
                Err(e) => {
                    tracing::warn!(event_id = %event.id, trigger = %matched.trigger_name, error = %e, "failed to create trailing process");
                    return;
                }
            };
            publish_progress(deps.nats.as_ref(), event.organization_id, event.id).await;

            let attempt = Attempt::new(deps, event, matched, process);
            let outcome = attempt.evaluate().await;
            attempt.finish(outcome).await;
        }
        .boxed()
    })
}

/// Sandbox side of an attempt. Runs on a blocking thread.
fn run_scripts(
    handle: Handle,
    deps: EngineDeps,
    event: &Event,
    matched: &MatchedCondition,
    process_id: ProcessId,
    shared: &[SharedScript],
) -> AttemptOutcome {
    let mut sandbox = match Sandbox::new(event, deps.settings.sandbox) {
        Ok(sandbox) => sandbox,
        Err(e) => return AttemptOutcome::Aborted(e.to_string()),
    };
    sandbox.load_shared(shared);

    match sandbox.evaluate_condition(&matched.condition_code) {
        Ok(true) => {}
        Ok(false) => return AttemptOutcome::ConditionFalse,
        Err(e) => return AttemptOutcome::ConditionFailed(e.to_string()),
    }

    // Held until the reaction returns, on every path.
    let _channel = deps
        .channels
        .blocking_acquire(event.organization_id, matched.trigger_channel.as_deref());

    if let Err(e) = handle.block_on(deps.audit.mark_executed(process_id)) {
        tracing::warn!(process_id = %process_id, error = %e, "failed to mark process executed");
    }
    handle.block_on(publish_progress(
        deps.nats.as_ref(),
        event.organization_id,
        event.id,
    ));

    let ctx = CallContext {
        organization_id: event.organization_id,
        process_id,
    };
    let host = AttemptHost::new(handle, &deps, ctx, event.id);
    if let Err(e) = sandbox.attach_host(Arc::new(host)) {
        return AttemptOutcome::ExecutedWithError(e.to_string());
    }

    match sandbox.run_reaction(&matched.trigger_code) {
        Ok(()) => AttemptOutcome::Executed,
        Err(e) => AttemptOutcome::ExecutedWithError(e.to_string()),
    }
}
