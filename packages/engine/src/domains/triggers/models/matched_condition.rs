use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{Condition, ConditionKind, ConditionKindError, Trigger};
use crate::common::{ConditionId, OrganizationId, TriggerId};

/// An enabled condition joined with its enabled trigger: everything one
/// processing attempt needs to know about what to run.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchedCondition {
    pub organization_id: OrganizationId,
    pub trigger_id: TriggerId,
    pub trigger_name: String,
    pub trigger_code: String,
    pub trigger_channel: Option<String>,
    pub condition_id: ConditionId,
    pub condition_name: String,
    pub condition_code: String,
    pub condition_type: String,
    pub condition_timeout: i64,
}

impl MatchedCondition {
    /// Conditions listening for `event_name` whose condition and trigger are
    /// both enabled.
    pub async fn find_for_event(
        organization_id: OrganizationId,
        event_name: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let matches = sqlx::query_as::<_, Self>(
            r#"
            SELECT trigger.organization_id AS organization_id,
                   trigger.id              AS trigger_id,
                   trigger.name            AS trigger_name,
                   trigger.code            AS trigger_code,
                   trigger.channel         AS trigger_channel,
                   condition.id            AS condition_id,
                   condition.name          AS condition_name,
                   condition.code          AS condition_code,
                   condition.type          AS condition_type,
                   condition.timeout       AS condition_timeout
            FROM condition
            INNER JOIN trigger ON condition.trigger_id = trigger.id
            WHERE trigger.organization_id = $1
              AND condition.name = $2
              AND condition.enable = true
              AND trigger.enable = true
            "#,
        )
        .bind(organization_id)
        .bind(event_name)
        .fetch_all(pool)
        .await?;
        Ok(matches)
    }

    pub fn from_parts(trigger: &Trigger, condition: &Condition) -> Self {
        Self {
            organization_id: trigger.organization_id,
            trigger_id: trigger.id,
            trigger_name: trigger.name.clone(),
            trigger_code: trigger.code.clone(),
            trigger_channel: trigger.channel.clone(),
            condition_id: condition.id,
            condition_name: condition.name.clone(),
            condition_code: condition.code.clone(),
            condition_type: condition.kind.clone(),
            condition_timeout: condition.timeout,
        }
    }

    pub fn kind(&self) -> std::result::Result<ConditionKind, ConditionKindError> {
        self.condition_type.parse()
    }

    /// Key of the throttle/debounce state shared by every attempt of this condition.
    pub fn scheduling_key(&self) -> String {
        format!("{}:{}", self.trigger_id, self.condition_name)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.condition_timeout.max(0) as u64)
    }
}
