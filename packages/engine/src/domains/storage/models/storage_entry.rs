use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::common::OrganizationId;

/// Organization-scoped key/value pair shared by reactions and modules.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StorageEntry {
    pub organization_id: OrganizationId,
    pub key: String,
    pub value: Option<JsonValue>,
    pub updated_at: DateTime<Utc>,
}

impl StorageEntry {
    pub async fn get(
        organization_id: OrganizationId,
        key: &str,
        pool: &PgPool,
    ) -> Result<Option<JsonValue>> {
        let entry = sqlx::query_as::<_, Self>(
            "SELECT * FROM storage WHERE organization_id = $1 AND key = $2",
        )
        .bind(organization_id)
        .bind(key)
        .fetch_optional(pool)
        .await?;
        Ok(entry.and_then(|e| e.value))
    }

    /// Upserts on `(organization_id, key)` and returns the stored value.
    pub async fn set(
        organization_id: OrganizationId,
        key: &str,
        value: JsonValue,
        pool: &PgPool,
    ) -> Result<JsonValue> {
        let entry = sqlx::query_as::<_, Self>(
            "INSERT INTO storage (organization_id, key, value, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (organization_id, key) DO UPDATE
             SET value = EXCLUDED.value, updated_at = NOW()
             RETURNING *",
        )
        .bind(organization_id)
        .bind(key)
        .bind(value)
        .fetch_one(pool)
        .await?;
        Ok(entry.value.unwrap_or(JsonValue::Null))
    }
}
