use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{ModuleId, ModuleSessionId};

/// An open module connection. The row lives exactly as long as the connection.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModuleSession {
    pub id: ModuleSessionId,
    pub module_id: ModuleId,
    pub connected_at: DateTime<Utc>,
}

impl ModuleSession {
    pub async fn open(module_id: ModuleId, pool: &PgPool) -> Result<Self> {
        let session = sqlx::query_as::<_, Self>(
            "INSERT INTO module_session (id, module_id) VALUES ($1, $2) RETURNING *",
        )
        .bind(ModuleSessionId::new())
        .bind(module_id)
        .fetch_one(pool)
        .await?;
        Ok(session)
    }

    pub async fn close(id: ModuleSessionId, pool: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM module_session WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
