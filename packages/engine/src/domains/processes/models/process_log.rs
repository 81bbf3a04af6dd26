use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::common::{ProcessId, ProcessLogId};

/// Free-form entry written by a reaction's `log(...)` call. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessLog {
    pub id: ProcessLogId,
    pub process_id: ProcessId,
    pub log: JsonValue,
    pub date: DateTime<Utc>,
}

impl ProcessLog {
    pub fn new(process_id: ProcessId, log: JsonValue) -> Self {
        Self {
            id: ProcessLogId::new(),
            process_id,
            log,
            date: Utc::now(),
        }
    }

    pub async fn append(process_id: ProcessId, log: JsonValue, pool: &PgPool) -> Result<Self> {
        let entry = sqlx::query_as::<_, Self>(
            "INSERT INTO process_log (id, process_id, log, date)
             VALUES ($1, $2, $3, NOW())
             RETURNING *",
        )
        .bind(ProcessLogId::new())
        .bind(process_id)
        .bind(log)
        .fetch_one(pool)
        .await?;
        Ok(entry)
    }

    pub async fn find_by_process(process_id: ProcessId, pool: &PgPool) -> Result<Vec<Self>> {
        let logs = sqlx::query_as::<_, Self>(
            "SELECT * FROM process_log WHERE process_id = $1 ORDER BY date, id",
        )
        .bind(process_id)
        .fetch_all(pool)
        .await?;
        Ok(logs)
    }
}
