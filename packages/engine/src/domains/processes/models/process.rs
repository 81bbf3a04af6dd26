use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{ConditionId, EventId, ProcessId, TriggerId};

/// One audit record per (event, matched condition) processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Process {
    pub id: ProcessId,
    pub event_id: EventId,
    pub trigger_id: TriggerId,
    pub condition_id: Option<ConditionId>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub executed: bool,
    pub error: Option<String>,
}

/// The four terminal transitions of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEnd {
    /// Condition false, scheduling cancellation.
    Stopped,
    /// Condition raised, or the condition type is unknown.
    Failed { error: String },
    /// Reaction ran to completion.
    Executed,
    /// Reaction raised.
    ExecutedWithError { error: String },
}

impl ProcessEnd {
    pub fn executed(&self) -> bool {
        matches!(self, ProcessEnd::Executed | ProcessEnd::ExecutedWithError { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProcessEnd::Failed { error } | ProcessEnd::ExecutedWithError { error } => {
                Some(error.as_str())
            }
            ProcessEnd::Stopped | ProcessEnd::Executed => None,
        }
    }
}

impl Process {
    /// Inserts a process with `start_at` already set.
    pub async fn create(
        event_id: EventId,
        trigger_id: TriggerId,
        condition_id: ConditionId,
        pool: &PgPool,
    ) -> Result<Self> {
        let process = sqlx::query_as::<_, Self>(
            "INSERT INTO process (id, event_id, trigger_id, condition_id, start_at)
             VALUES ($1, $2, $3, $4, NOW())
             RETURNING *",
        )
        .bind(ProcessId::new())
        .bind(event_id)
        .bind(trigger_id)
        .bind(condition_id)
        .fetch_one(pool)
        .await?;
        Ok(process)
    }

    pub async fn find_by_id(id: ProcessId, pool: &PgPool) -> Result<Option<Self>> {
        let process = sqlx::query_as::<_, Self>("SELECT * FROM process WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(process)
    }

    pub async fn find_by_event(event_id: EventId, pool: &PgPool) -> Result<Vec<Self>> {
        let processes = sqlx::query_as::<_, Self>(
            "SELECT * FROM process WHERE event_id = $1 ORDER BY id",
        )
        .bind(event_id)
        .fetch_all(pool)
        .await?;
        Ok(processes)
    }

    /// Flags the process as having entered its reaction phase.
    pub async fn mark_executed(id: ProcessId, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE process SET executed = true WHERE id = $1 AND end_at IS NULL")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Applies a terminal transition. Returns false if the process had
    /// already ended, in which case nothing is written.
    pub async fn finish(id: ProcessId, end: &ProcessEnd, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE process
             SET end_at = NOW(), executed = executed OR $2, error = $3
             WHERE id = $1 AND end_at IS NULL",
        )
        .bind(id)
        .bind(end.executed())
        .bind(end.error())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_transition_flags() {
        assert!(!ProcessEnd::Stopped.executed());
        assert_eq!(ProcessEnd::Stopped.error(), None);

        let failed = ProcessEnd::Failed { error: "boom".into() };
        assert!(!failed.executed());
        assert_eq!(failed.error(), Some("boom"));

        assert!(ProcessEnd::Executed.executed());

        let partial = ProcessEnd::ExecutedWithError { error: "late".into() };
        assert!(partial.executed());
        assert_eq!(partial.error(), Some("late"));
    }
}
