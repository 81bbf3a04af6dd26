//! Correlation of module replies.
//!
//! Every outstanding module request registers a oneshot under its
//! correlation id. Replies arriving on the shared inbox are handed to the
//! matching waiter; replies nobody waits for (late, duplicated, foreign)
//! are dropped.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

use super::nats::RequestError;
use crate::common::CorrelationId;

#[derive(Default)]
pub struct ReplyRouter {
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<Bytes>>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter. Must happen before the request is published.
    pub fn register(&self, correlation_id: CorrelationId) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(correlation_id, tx);
        rx
    }

    /// Drops a waiter without resolving it.
    pub fn forget(&self, correlation_id: CorrelationId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&correlation_id);
    }

    /// Hands `payload` to the waiter registered under `token`.
    ///
    /// Returns false when the token is not a correlation id or nobody waits
    /// for it anymore.
    pub fn route(&self, token: &str, payload: Bytes) -> bool {
        let Ok(correlation_id) = CorrelationId::parse(token) else {
            tracing::debug!(token = %token, "ignoring reply with malformed correlation id");
            return false;
        };

        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&correlation_id);

        match waiter {
            Some(waiter) => waiter.send(payload).is_ok(),
            None => {
                tracing::debug!(correlation_id = %correlation_id, "dropping reply with no pending request");
                false
            }
        }
    }

    /// Waits for the reply of a registered request, deregistering on timeout.
    pub async fn wait(
        &self,
        correlation_id: CorrelationId,
        receiver: oneshot::Receiver<Bytes>,
        request_timeout: Duration,
    ) -> Result<Bytes, RequestError> {
        match timeout(request_timeout, receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RequestError::Transport(
                "reply channel closed".to_string(),
            )),
            Err(_) => {
                self.forget(correlation_id);
                Err(RequestError::TimedOut(request_timeout))
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
