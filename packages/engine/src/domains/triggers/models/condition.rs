use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use crate::common::{ConditionId, TriggerId};

/// Scheduling policy of a condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    /// Evaluate immediately.
    Basic,
    /// Leading edge runs, calls during cooldown are stopped and the last one
    /// is deferred to the end of the cooldown.
    Throttle,
    /// Only the last call of a quiet period runs.
    Debounce,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown trigger condition type : {0}")]
pub struct ConditionKindError(pub String);

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionKind::Basic => write!(f, "BASIC"),
            ConditionKind::Throttle => write!(f, "THROTTLE"),
            ConditionKind::Debounce => write!(f, "DEBOUNCE"),
        }
    }
}

impl std::str::FromStr for ConditionKind {
    type Err = ConditionKindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BASIC" => Ok(ConditionKind::Basic),
            "THROTTLE" => Ok(ConditionKind::Throttle),
            "DEBOUNCE" => Ok(ConditionKind::Debounce),
            other => Err(ConditionKindError(other.to_string())),
        }
    }
}

/// A boolean guard bound to a trigger. `name` is the event name it listens for.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Condition {
    pub id: ConditionId,
    pub trigger_id: TriggerId,
    pub name: String,
    pub code: String,
    /// Kept as text so rows with an unknown type still load and fail per attempt.
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    /// Milliseconds.
    pub timeout: i64,
    pub enable: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCondition {
    pub trigger_id: TriggerId,
    pub name: String,
    pub code: String,
    pub kind: String,
    pub timeout: i64,
    pub enable: bool,
}

impl Condition {
    pub async fn create(input: CreateCondition, pool: &PgPool) -> Result<Self> {
        let condition = sqlx::query_as::<_, Self>(
            "INSERT INTO condition (id, trigger_id, name, code, type, timeout, enable)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(ConditionId::new())
        .bind(input.trigger_id)
        .bind(input.name)
        .bind(input.code)
        .bind(input.kind)
        .bind(input.timeout)
        .bind(input.enable)
        .fetch_one(pool)
        .await?;
        Ok(condition)
    }

    pub async fn find_by_trigger(trigger_id: TriggerId, pool: &PgPool) -> Result<Vec<Self>> {
        let conditions = sqlx::query_as::<_, Self>(
            "SELECT * FROM condition WHERE trigger_id = $1 ORDER BY created_at",
        )
        .bind(trigger_id)
        .fetch_all(pool)
        .await?;
        Ok(conditions)
    }
}
