use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{ModuleId, ModuleSessionId, OrganizationId};

/// A remote peer reachable over the bus while it holds an open session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Module {
    pub id: ModuleId,
    pub organization_id: OrganizationId,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateModule {
    pub organization_id: OrganizationId,
    pub code: String,
    pub name: String,
}

/// A module name resolved for one organization, with its live session if
/// the module is connected.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ResolvedModule {
    pub module_id: ModuleId,
    pub session_id: Option<ModuleSessionId>,
}

impl Module {
    pub async fn create(input: CreateModule, pool: &PgPool) -> Result<Self> {
        let module = sqlx::query_as::<_, Self>(
            "INSERT INTO module (id, organization_id, code, name)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(ModuleId::new())
        .bind(input.organization_id)
        .bind(input.code)
        .bind(input.name)
        .fetch_one(pool)
        .await?;
        Ok(module)
    }

    /// Resolves a module by name or code. The most recent session wins when a
    /// module is connected more than once.
    pub async fn resolve(
        organization_id: OrganizationId,
        name_or_code: &str,
        pool: &PgPool,
    ) -> Result<Option<ResolvedModule>> {
        let resolved = sqlx::query_as::<_, ResolvedModule>(
            r#"
            SELECT module.id AS module_id, module_session.id AS session_id
            FROM module
            LEFT JOIN module_session ON module_session.module_id = module.id
            WHERE module.organization_id = $1
              AND (module.code = $2 OR module.name = $2)
            ORDER BY module_session.connected_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(name_or_code)
        .fetch_optional(pool)
        .await?;
        Ok(resolved)
    }
}
