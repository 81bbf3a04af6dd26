//! NATS client abstraction for production and testing.
//!
//! Provides a trait-based NATS implementation that allows swapping between
//! real NATS connections and test mocks. Besides fire-and-forget publishing
//! the engine needs correlated request/reply to reach modules, which
//! [`NatsModuleTransport`] implements on top of a private reply inbox.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::reply_router::ReplyRouter;
use crate::common::CorrelationId;

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Trait for NATS publish operations.
///
/// This allows swapping between real NATS and test mocks.
#[async_trait]
pub trait NatsPublisher: Send + Sync {
    /// Publish a message to a subject.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// Failure of a correlated request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Correlated request/reply on top of publishing.
#[async_trait]
pub trait NatsRequester: NatsPublisher {
    /// Publish `payload` on `subject` and wait up to `timeout` for the reply.
    async fn request(
        &self,
        subject: String,
        payload: Bytes,
        timeout: Duration,
    ) -> std::result::Result<Bytes, RequestError>;
}

/// Real NATS client publisher.
pub struct NatsClientPublisher {
    client: async_nats::Client,
}

impl NatsClientPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NatsPublisher for NatsClientPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

/// NATS transport used to talk to modules.
///
/// Replies come back on `{inbox}.{correlation_id}`; one subscription on
/// `{inbox}.*` feeds every pending call through the [`ReplyRouter`].
pub struct NatsModuleTransport {
    client: async_nats::Client,
    inbox: String,
    router: Arc<ReplyRouter>,
}

impl NatsModuleTransport {
    /// Subscribes to a fresh reply inbox and starts routing replies until
    /// `shutdown` is cancelled.
    pub async fn start(client: async_nats::Client, shutdown: CancellationToken) -> Result<Self> {
        let inbox = client.new_inbox();
        let mut replies = client
            .subscribe(format!("{}.*", inbox))
            .await
            .context("Failed to subscribe to module reply inbox")?;

        let router = Arc::new(ReplyRouter::new());
        let routing = router.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = replies.next() => match message {
                        Some(message) => {
                            let subject: &str = &message.subject;
                            let token = subject.rsplit('.').next().unwrap_or_default();
                            routing.route(token, message.payload.clone());
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("module reply router stopped");
        });

        tracing::info!(inbox = %inbox, "module reply inbox ready");
        Ok(Self {
            client,
            inbox,
            router,
        })
    }
}

#[async_trait]
impl NatsPublisher for NatsModuleTransport {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl NatsRequester for NatsModuleTransport {
    async fn request(
        &self,
        subject: String,
        payload: Bytes,
        timeout: Duration,
    ) -> std::result::Result<Bytes, RequestError> {
        let correlation_id = CorrelationId::new();

        // Register before publishing so a fast reply cannot be missed
        let receiver = self.router.register(correlation_id);

        let reply_to = format!("{}.{}", self.inbox, correlation_id);
        if let Err(e) = self
            .client
            .publish_with_reply(subject, reply_to, payload)
            .await
        {
            self.router.forget(correlation_id);
            return Err(RequestError::Transport(e.to_string()));
        }

        self.router.wait(correlation_id, receiver, timeout).await
    }
}

type Responder = Box<dyn Fn(&str, &Bytes) -> Option<Bytes> + Send + Sync>;

/// Mock NATS client that tracks published messages for testing.
///
/// Requests are recorded like publishes. A scripted responder decides the
/// reply; without one (or when it returns `None`) the request times out.
#[derive(Default)]
pub struct TestNats {
    /// Messages published to subjects.
    published: RwLock<Vec<PublishedMessage>>,
    responder: RwLock<Option<Responder>>,
}

impl TestNats {
    /// Create a new test NATS client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every request with whatever `responder` returns.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&str, &Bytes) -> Option<Bytes> + Send + Sync + 'static,
    {
        *self.responder.write().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(responder));
        self
    }

    /// Record a published message.
    pub fn record_publish(&self, subject: String, payload: Bytes) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
    }

    /// Get all published messages.
    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get published messages for a specific subject.
    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Get published messages matching a subject prefix.
    pub fn messages_with_prefix(&self, prefix: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Check if any message was published to a subject.
    pub fn was_published_to(&self, subject: &str) -> bool {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|m| m.subject == subject)
    }

    /// Get the count of messages published to a specific subject.
    pub fn publish_count_for(&self, subject: &str) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .count()
    }

    /// Clear all recorded messages.
    pub fn clear(&self) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Deserialize a published message payload as JSON.
    pub fn deserialize_message<T: serde::de::DeserializeOwned>(
        &self,
        msg: &PublishedMessage,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&msg.payload)
    }
}

#[async_trait]
impl NatsPublisher for TestNats {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.record_publish(subject, payload);
        Ok(())
    }
}

#[async_trait]
impl NatsRequester for TestNats {
    async fn request(
        &self,
        subject: String,
        payload: Bytes,
        timeout: Duration,
    ) -> std::result::Result<Bytes, RequestError> {
        let reply = self
            .responder
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|responder| responder(&subject, &payload));
        self.record_publish(subject, payload);

        match reply {
            Some(reply) => Ok(reply),
            None => {
                tokio::time::sleep(timeout).await;
                Err(RequestError::TimedOut(timeout))
            }
        }
    }
}
