use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::paths::{ancestor_dirs, depth, parent_dir};
use crate::common::{OrganizationId, SharedScriptId};

/// Reusable script injected into the sandbox of every trigger below its
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SharedScript {
    pub id: SharedScriptId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub code: String,
    pub enable: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSharedScript {
    pub organization_id: OrganizationId,
    pub name: String,
    pub code: String,
    pub enable: bool,
}

impl SharedScript {
    /// Whether this script sits directly inside one of `trigger_path`'s
    /// ancestor directories.
    pub fn applies_to(&self, trigger_path: &str) -> bool {
        ancestor_dirs(trigger_path).contains(&parent_dir(&self.name))
    }

    /// Orders scripts the way they are loaded: shallower directories first,
    /// most recently created first within a directory.
    pub fn sort_for_loading(scripts: &mut [SharedScript]) {
        scripts.sort_by(|a, b| {
            depth(&parent_dir(&a.name))
                .cmp(&depth(&parent_dir(&b.name)))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
    }

    /// Enabled scripts applicable to `trigger_path`, in loading order.
    pub async fn find_for_trigger_path(
        organization_id: OrganizationId,
        trigger_path: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let dirs = ancestor_dirs(trigger_path);
        // Same rule as `parent_dir`: trailing slashes ignored, slashless names live in `/`.
        let mut scripts = sqlx::query_as::<_, Self>(
            r#"
            SELECT *
            FROM shared
            WHERE organization_id = $1
              AND enable = true
              AND COALESCE(NULLIF(regexp_replace(rtrim(name, '/'), '/?[^/]*$', ''), ''), '/') = ANY($2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(organization_id)
        .bind(&dirs)
        .fetch_all(pool)
        .await?;

        Self::sort_for_loading(&mut scripts);
        Ok(scripts)
    }

    pub async fn create(input: CreateSharedScript, pool: &PgPool) -> Result<Self> {
        let script = sqlx::query_as::<_, Self>(
            "INSERT INTO shared (id, organization_id, name, code, enable)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(SharedScriptId::new())
        .bind(input.organization_id)
        .bind(input.name)
        .bind(input.code)
        .bind(input.enable)
        .fetch_one(pool)
        .await?;
        Ok(script)
    }
}
