//! Bus intake: event ids arrive on a queue-group subscription, are claimed
//! and dispatched.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Dispatcher;
use crate::common::EventId;

#[derive(Clone)]
pub struct EventConsumer {
    dispatcher: Dispatcher,
}

/// Message bodies are bare event ids.
pub fn parse_event_id(payload: &[u8]) -> Result<EventId> {
    let raw = std::str::from_utf8(payload).context("event id is not utf-8")?;
    EventId::parse(raw.trim()).with_context(|| format!("invalid event id: {:?}", raw))
}

impl EventConsumer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Consumes `subject` in `queue_group` until `shutdown` is cancelled.
    pub async fn run(
        &self,
        client: async_nats::Client,
        subject: String,
        queue_group: String,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut messages = client
            .queue_subscribe(subject.clone(), queue_group.clone())
            .await
            .context("Failed to subscribe to event subject")?;
        tracing::info!(subject = %subject, queue_group = %queue_group, "consuming events");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = messages.next() => match message {
                    Some(message) => {
                        self.accept(message.payload);
                    }
                    None => break,
                },
            }
        }

        tracing::info!("event consumer stopped");
        Ok(())
    }

    /// Claims and dispatches one message on its own task.
    pub fn accept(&self, payload: Bytes) -> JoinHandle<Option<EventId>> {
        let consumer = self.clone();
        tokio::spawn(async move { consumer.handle(&payload).await })
    }

    /// Claims and dispatches one event. Ids already claimed by another
    /// worker are skipped. Returns the claimed id.
    pub async fn handle(&self, payload: &[u8]) -> Option<EventId> {
        let event_id = match parse_event_id(payload) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed event message");
                return None;
            }
        };

        let event = match self.dispatcher.deps().events.claim_event(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(event_id = %event_id, "event already in process");
                return None;
            }
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "failed to claim event");
                return None;
            }
        };

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(event).await {
                tracing::error!(event_id = %event_id, error = %e, "event dispatch failed");
            }
        });
        Some(event_id)
    }
}
