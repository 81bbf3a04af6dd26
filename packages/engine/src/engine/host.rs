//! Reaction host backing the sandbox bindings for one attempt.
//!
//! Runs on the sandbox's blocking thread. Calls the script waits on
//! (`module.request`, `storage.*`) block on the runtime handle; everything
//! else is spawned.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::publish_progress;
use crate::common::{subjects, EventId};
use crate::config::StorageKeyPolicy;
use crate::kernel::{BaseAuditStore, BaseStorage, CallContext, EngineDeps, ModuleBridge, NatsRequester};
use crate::sandbox::{HostError, ReactionHost};

pub struct AttemptHost {
    handle: Handle,
    ctx: CallContext,
    event_id: EventId,
    bridge: ModuleBridge,
    audit: Arc<dyn BaseAuditStore>,
    storage: Arc<dyn BaseStorage>,
    nats: Arc<dyn NatsRequester>,
    keys: StorageKeyPolicy,
}

impl AttemptHost {
    pub fn new(handle: Handle, deps: &EngineDeps, ctx: CallContext, event_id: EventId) -> Self {
        Self {
            handle,
            ctx,
            event_id,
            bridge: deps.module_bridge(),
            audit: deps.audit.clone(),
            storage: deps.storage.clone(),
            nats: deps.nats.clone(),
            keys: deps.settings.storage_keys.clone(),
        }
    }

    fn check_key(&self, op: &'static str, key: &str) -> Result<(), HostError> {
        if self.keys.accepts(key) {
            Ok(())
        } else {
            Err(HostError::KeyTooShort {
                op,
                min: self.keys.min_len,
            })
        }
    }
}

impl ReactionHost for AttemptHost {
    fn log(&self, entry: JsonValue) {
        let audit = self.audit.clone();
        let nats = self.nats.clone();
        let process_id = self.ctx.process_id;
        let organization_id = self.ctx.organization_id;
        let event_id = self.event_id;
        self.handle.spawn(async move {
            if let Err(e) = audit.append_process_log(process_id, entry).await {
                tracing::warn!(process_id = %process_id, error = %e, "failed to append process log");
                return;
            }
            publish_progress(nats.as_ref(), organization_id, event_id).await;
        });
    }

    fn module_request(
        &self,
        module: &str,
        method: &str,
        params: JsonValue,
    ) -> Result<JsonValue, HostError> {
        self.handle
            .block_on(self.bridge.request(self.ctx, module, method, params))
            .map_err(|e| HostError::Module(e.to_string()))
    }

    fn module_notify(&self, module: &str, method: &str, params: JsonValue) {
        let bridge = self.bridge.clone();
        let ctx = self.ctx;
        let module = module.to_string();
        let method = method.to_string();
        self.handle.spawn(async move {
            bridge.notify(ctx, &module, &method, params).await;
        });
    }

    fn storage_get(&self, key: &str) -> Result<Option<JsonValue>, HostError> {
        self.check_key("get", key)?;
        match self
            .handle
            .block_on(self.storage.get(self.ctx.organization_id, key))
        {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "storage get failed");
                Ok(None)
            }
        }
    }

    fn storage_set(&self, key: &str, value: JsonValue) -> Result<JsonValue, HostError> {
        self.check_key("set", key)?;
        let stored = self
            .handle
            .block_on(self.storage.set(self.ctx.organization_id, key, value))
            .map_err(|e| HostError::Storage(e.to_string()))?;

        let nats = self.nats.clone();
        let subject = subjects::storage(self.ctx.organization_id);
        let message = json!({
            "type": "storage",
            "payload": {"key": key, "value": stored},
        });
        self.handle.spawn(async move {
            let body = match serde_json::to_vec(&message) {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode storage broadcast");
                    return;
                }
            };
            if let Err(e) = nats.publish(subject, body.into()).await {
                tracing::warn!(error = %e, "failed to broadcast storage update");
            }
        });

        Ok(stored)
    }
}
