use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{OrganizationId, TriggerId};

/// A named reaction script. `name` is path-like and unique per organization.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trigger {
    pub id: TriggerId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub code: String,
    pub enable: bool,
    /// Serialization channel; reactions sharing a non-blank channel never overlap.
    pub channel: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTrigger {
    pub organization_id: OrganizationId,
    pub name: String,
    pub code: String,
    pub enable: bool,
    pub channel: Option<String>,
}

impl Trigger {
    pub async fn find_by_id(id: TriggerId, pool: &PgPool) -> Result<Self> {
        let trigger = sqlx::query_as::<_, Self>("SELECT * FROM trigger WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(trigger)
    }

    pub async fn create(input: CreateTrigger, pool: &PgPool) -> Result<Self> {
        let trigger = sqlx::query_as::<_, Self>(
            "INSERT INTO trigger (id, organization_id, name, code, enable, channel)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(TriggerId::new())
        .bind(input.organization_id)
        .bind(input.name)
        .bind(input.code)
        .bind(input.enable)
        .bind(input.channel)
        .fetch_one(pool)
        .await?;
        Ok(trigger)
    }
}
