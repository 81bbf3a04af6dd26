use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::common::{EventId, OrganizationId};

/// Lifecycle of an event row on its way through the worker pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Queued,
    Consumed,
    Done,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStatus::Queued => write!(f, "QUEUED"),
            EventStatus::Consumed => write!(f, "CONSUMED"),
            EventStatus::Done => write!(f, "DONE"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(EventStatus::Queued),
            "CONSUMED" => Ok(EventStatus::Consumed),
            "DONE" => Ok(EventStatus::Done),
            _ => Err(anyhow::anyhow!("Invalid event status: {}", s)),
        }
    }
}

/// An emitted event. Immutable once created; `(organization_id, name)` is the
/// dispatch key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: EventId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub payload: JsonValue,
    pub emitter_code: String,
    pub emitter_name: String,
    pub emitted_at: DateTime<Utc>,
}

/// Input for recording a new event (emitters and fixtures).
#[derive(Debug, Clone)]
pub struct CreateEvent {
    pub organization_id: OrganizationId,
    pub name: String,
    pub payload: JsonValue,
    pub emitter_code: String,
    pub emitter_name: String,
}

const EVENT_COLUMNS: &str =
    "id, organization_id, name, payload, emitter_code, emitter_name, emitted_at";

impl Event {
    pub async fn find_by_id(id: EventId, pool: &PgPool) -> Result<Option<Self>> {
        let event = sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM event WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(event)
    }

    pub async fn create(input: CreateEvent, pool: &PgPool) -> Result<Self> {
        let event = sqlx::query_as::<_, Self>(&format!(
            "INSERT INTO event (id, organization_id, name, payload, emitter_code, emitter_name)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(EventId::new())
        .bind(input.organization_id)
        .bind(input.name)
        .bind(input.payload)
        .bind(input.emitter_code)
        .bind(input.emitter_name)
        .fetch_one(pool)
        .await?;
        Ok(event)
    }

    /// Atomically moves a queued event to `CONSUMED`.
    ///
    /// Returns `None` when the event does not exist or another worker already
    /// claimed it.
    pub async fn claim(id: EventId, pool: &PgPool) -> Result<Option<Self>> {
        let event = sqlx::query_as::<_, Self>(&format!(
            "UPDATE event SET status = $2 WHERE id = $1 AND status = $3 RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(id)
        .bind(EventStatus::Consumed.to_string())
        .bind(EventStatus::Queued.to_string())
        .fetch_optional(pool)
        .await?;
        Ok(event)
    }

    /// Moves a consumed event to `DONE`. Returns false if it was not `CONSUMED`.
    pub async fn complete(id: EventId, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query("UPDATE event SET status = $2 WHERE id = $1 AND status = $3")
            .bind(id)
            .bind(EventStatus::Done.to_string())
            .bind(EventStatus::Consumed.to_string())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn status(id: EventId, pool: &PgPool) -> Result<Option<EventStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM event WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        status.map(|s| s.parse()).transpose()
    }
}
