//! Event dispatcher: one process and one attempt task per matched condition.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::{publish_progress, Attempt, AttemptOutcome};
use crate::common::ProcessId;
use crate::domains::events::Event;
use crate::kernel::EngineDeps;

/// Attempts spawned for one event.
#[derive(Default)]
pub struct Dispatched {
    pub processes: Vec<ProcessId>,
    attempts: Vec<JoinHandle<AttemptOutcome>>,
}

impl Dispatched {
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Waits for every attempt. Throttle trailing runs are not included.
    pub async fn join(self) -> Vec<AttemptOutcome> {
        let mut outcomes = Vec::with_capacity(self.attempts.len());
        for attempt in self.attempts {
            outcomes.push(match attempt.await {
                Ok(outcome) => outcome,
                Err(e) => AttemptOutcome::Aborted(format!("attempt task failed: {}", e)),
            });
        }
        outcomes
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    deps: EngineDeps,
}

impl Dispatcher {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    /// Matches the event against enabled conditions and spawns one attempt
    /// per match. Returns without waiting for any attempt.
    ///
    /// A failure to create one process skips that match only.
    pub async fn dispatch(&self, event: Event) -> Result<Dispatched> {
        let matches = self
            .deps
            .triggers
            .find_matching_conditions(event.organization_id, &event.name)
            .await?;

        tracing::info!(
            event_id = %event.id,
            event = %event.name,
            organization_id = %event.organization_id,
            matches = matches.len(),
            "dispatching event"
        );

        let event = Arc::new(event);
        let mut dispatched = Dispatched::default();
        for matched in matches {
            let process = match self
                .deps
                .audit
                .create_process(event.id, matched.trigger_id, matched.condition_id)
                .await
            {
                Ok(process) => process,
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.id,
                        trigger_id = %matched.trigger_id,
                        condition = %matched.condition_name,
                        error = %e,
                        "failed to create process, skipping condition"
                    );
                    continue;
                }
            };
            publish_progress(self.deps.nats.as_ref(), event.organization_id, event.id).await;
            tracing::debug!(
                process_id = %process.id,
                trigger = %matched.trigger_name,
                condition = %matched.condition_name,
                kind = %matched.condition_type,
                "process started"
            );

            let attempt = Attempt::new(self.deps.clone(), event.clone(), Arc::new(matched), process);
            dispatched.processes.push(attempt.process_id());
            dispatched.attempts.push(tokio::spawn(attempt.run()));
        }

        if dispatched.is_empty() {
            self.deps.events.complete_event(event.id).await?;
        }
        Ok(dispatched)
    }
}
