//! Module request/notify bridge.
//!
//! Resolves a module name to its live session, records the call in the audit
//! trail, sends it over the bus and (for requests) waits for the correlated
//! reply. Audit updates after the send are spawned so the calling script
//! only waits on the module itself.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::nats::{NatsRequester, RequestError};
use super::traits::{BaseAuditStore, BaseModuleDirectory};
use crate::common::{subjects, ModuleId, OrganizationId, ProcessId, ProcessRequestId};
use crate::domains::modules::ResolvedModule;
use crate::domains::processes::{CreateProcessRequest, RequestOutcome};

/// Default `module.request` timeout.
pub const DEFAULT_MODULE_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

/// Recorded on the process request when the module has no live session.
pub const NOT_CONNECTED: &str = "no module connected";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no module connected: {0}")]
    NotConnected(String),
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("module {module} method {method} error: {error}")]
    Module {
        module: String,
        method: String,
        error: JsonValue,
    },
    #[error("invalid module response: {0}")]
    InvalidResponse(String),
    #[error("failed to encode module message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<RequestError> for BridgeError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::TimedOut(timeout) => BridgeError::TimedOut(timeout),
            RequestError::Transport(message) => BridgeError::Transport(message),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModuleAction {
    Request,
    Notify,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleCall {
    pub method: String,
    pub params: JsonValue,
}

/// Message delivered on a module session subject.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action: ModuleAction,
    pub payload: ModuleCall,
}

impl ModuleMessage {
    pub fn new(action: ModuleAction, method: &str, params: JsonValue) -> Self {
        Self {
            kind: "module",
            action,
            payload: ModuleCall {
                method: method.to_string(),
                params,
            },
        }
    }
}

/// Parses a `{"success": ...}` / `{"error": ...}` reply.
///
/// A present, non-null `error` wins over `success`.
pub fn parse_reply(reply: &[u8]) -> Result<Result<JsonValue, JsonValue>, BridgeError> {
    let value: JsonValue = serde_json::from_slice(reply)
        .map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;
    let JsonValue::Object(mut fields) = value else {
        return Err(BridgeError::InvalidResponse("reply is not an object".to_string()));
    };

    match (fields.remove("error"), fields.remove("success")) {
        (Some(error), _) if !error.is_null() => Ok(Err(error)),
        (_, Some(success)) => Ok(Ok(success)),
        (Some(_), None) => Ok(Ok(JsonValue::Null)),
        (None, None) => Err(BridgeError::InvalidResponse(
            "reply has neither success nor error".to_string(),
        )),
    }
}

/// Who is calling: module calls are scoped to the caller's organization and
/// audited against its process.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub organization_id: OrganizationId,
    pub process_id: ProcessId,
}

#[derive(Clone)]
pub struct ModuleBridge {
    directory: Arc<dyn BaseModuleDirectory>,
    transport: Arc<dyn NatsRequester>,
    audit: Arc<dyn BaseAuditStore>,
    request_timeout: Duration,
}

impl ModuleBridge {
    pub fn new(
        directory: Arc<dyn BaseModuleDirectory>,
        transport: Arc<dyn NatsRequester>,
        audit: Arc<dyn BaseAuditStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            transport,
            audit,
            request_timeout,
        }
    }

    /// Sends a request and waits for the module's reply.
    pub async fn request(
        &self,
        ctx: CallContext,
        module: &str,
        method: &str,
        params: JsonValue,
    ) -> Result<JsonValue, BridgeError> {
        let resolved = self.resolve(ctx.organization_id, module).await;
        let request_id = self
            .record(ctx, resolved.as_ref().map(|r| r.module_id), method, params.clone(), false)
            .await;

        let Some(session_id) = resolved.and_then(|r| r.session_id) else {
            tracing::warn!(module = %module, method = %method, "request to a module with no live session");
            self.spawn_outcome(request_id, RequestOutcome::Error(json!(NOT_CONNECTED)));
            return Err(BridgeError::NotConnected(module.to_string()));
        };

        let subject = subjects::module_session(ctx.organization_id, session_id);
        let result = self.send_request(&subject, module, method, params).await;

        let outcome = match &result {
            Ok(value) => RequestOutcome::Success(value.clone()),
            Err(BridgeError::Module { error, .. }) => RequestOutcome::Error(error.clone()),
            Err(other) => RequestOutcome::Error(json!(other.to_string())),
        };
        self.spawn_outcome(request_id, outcome);

        if let Err(e) = &result {
            tracing::warn!(module = %module, method = %method, error = %e, "module request failed");
        }
        result
    }

    async fn send_request(
        &self,
        subject: &str,
        module: &str,
        method: &str,
        params: JsonValue,
    ) -> Result<JsonValue, BridgeError> {
        let body = serde_json::to_vec(&ModuleMessage::new(ModuleAction::Request, method, params))?;
        let reply = self
            .transport
            .request(subject.to_string(), Bytes::from(body), self.request_timeout)
            .await?;

        parse_reply(&reply)?.map_err(|error| BridgeError::Module {
            module: module.to_string(),
            method: method.to_string(),
            error,
        })
    }

    /// Delivers a notification. Failures are recorded, never returned.
    pub async fn notify(&self, ctx: CallContext, module: &str, method: &str, params: JsonValue) {
        let resolved = self.resolve(ctx.organization_id, module).await;
        let request_id = self
            .record(ctx, resolved.as_ref().map(|r| r.module_id), method, params.clone(), true)
            .await;

        let Some(session_id) = resolved.and_then(|r| r.session_id) else {
            tracing::warn!(module = %module, method = %method, "notify to a module with no live session");
            self.finish(request_id, RequestOutcome::Error(json!(NOT_CONNECTED))).await;
            return;
        };

        let subject = subjects::module_session(ctx.organization_id, session_id);
        let outcome = match serde_json::to_vec(&ModuleMessage::new(ModuleAction::Notify, method, params)) {
            Ok(body) => match self.transport.publish(subject, Bytes::from(body)).await {
                Ok(()) => RequestOutcome::Success(JsonValue::Null),
                Err(e) => {
                    tracing::warn!(module = %module, method = %method, error = %e, "module notify failed");
                    RequestOutcome::Error(json!(e.to_string()))
                }
            },
            Err(e) => RequestOutcome::Error(json!(e.to_string())),
        };
        self.finish(request_id, outcome).await;
    }

    async fn resolve(&self, organization_id: OrganizationId, module: &str) -> Option<ResolvedModule> {
        match self.directory.find_module(organization_id, module).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(module = %module, error = %e, "module lookup failed");
                None
            }
        }
    }

    async fn record(
        &self,
        ctx: CallContext,
        module_id: Option<ModuleId>,
        method: &str,
        params: JsonValue,
        notification: bool,
    ) -> Option<ProcessRequestId> {
        let input = CreateProcessRequest {
            process_id: ctx.process_id,
            module_id,
            method: method.to_string(),
            params,
            notification,
        };
        match self.audit.create_process_request(input).await {
            Ok(request) => Some(request.id),
            Err(e) => {
                tracing::warn!(process_id = %ctx.process_id, error = %e, "failed to record module call");
                None
            }
        }
    }

    async fn finish(&self, request_id: Option<ProcessRequestId>, outcome: RequestOutcome) {
        let Some(request_id) = request_id else {
            return;
        };
        if let Err(e) = self.audit.resolve_process_request(request_id, outcome).await {
            tracing::warn!(request_id = %request_id, error = %e, "failed to record module call outcome");
        }
    }

    fn spawn_outcome(&self, request_id: Option<ProcessRequestId>, outcome: RequestOutcome) {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.finish(request_id, outcome).await });
    }
}
