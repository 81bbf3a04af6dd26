//! In-memory module directory.
//!
//! Used when module connections terminate in the same process as the
//! engine: the connection layer registers modules and opens/closes sessions
//! as sockets come and go.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::traits::BaseModuleDirectory;
use crate::common::{ModuleId, ModuleSessionId, OrganizationId};
use crate::domains::modules::ResolvedModule;

struct RegisteredModule {
    organization_id: OrganizationId,
    name: String,
    code: String,
    /// Open sessions, oldest first.
    sessions: Vec<ModuleSessionId>,
}

#[derive(Default)]
pub struct ModuleSessionRegistry {
    modules: Mutex<HashMap<ModuleId, RegisteredModule>>,
}

impl ModuleSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module(
        &self,
        organization_id: OrganizationId,
        name: &str,
        code: &str,
    ) -> ModuleId {
        let module_id = ModuleId::new();
        self.modules.lock().unwrap_or_else(|e| e.into_inner()).insert(
            module_id,
            RegisteredModule {
                organization_id,
                name: name.to_string(),
                code: code.to_string(),
                sessions: Vec::new(),
            },
        );
        module_id
    }

    /// Opens a session for a registered module. `None` if the module is unknown.
    pub fn open_session(&self, module_id: ModuleId) -> Option<ModuleSessionId> {
        let mut modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        let module = modules.get_mut(&module_id)?;
        let session_id = ModuleSessionId::new();
        module.sessions.push(session_id);
        tracing::debug!(module = %module.name, session_id = %session_id, "module session opened");
        Some(session_id)
    }

    pub fn close_session(&self, session_id: ModuleSessionId) {
        let mut modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        for module in modules.values_mut() {
            module.sessions.retain(|s| *s != session_id);
        }
    }

    fn lookup(&self, organization_id: OrganizationId, name_or_code: &str) -> Option<ResolvedModule> {
        let modules = self.modules.lock().unwrap_or_else(|e| e.into_inner());
        modules
            .iter()
            .find(|(_, m)| {
                m.organization_id == organization_id
                    && (m.name == name_or_code || m.code == name_or_code)
            })
            .map(|(id, m)| ResolvedModule {
                module_id: *id,
                session_id: m.sessions.last().copied(),
            })
    }
}

#[async_trait]
impl BaseModuleDirectory for ModuleSessionRegistry {
    async fn find_module(
        &self,
        organization_id: OrganizationId,
        name_or_code: &str,
    ) -> Result<Option<ResolvedModule>> {
        Ok(self.lookup(organization_id, name_or_code))
    }
}
