use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::common::{ModuleId, ProcessId, ProcessRequestId};

/// One module call made by a reaction script.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessRequest {
    pub id: ProcessRequestId,
    pub process_id: ProcessId,
    /// `None` when the module name did not resolve.
    pub module_id: Option<ModuleId>,
    pub method: String,
    pub params: Option<JsonValue>,
    pub notification: bool,
    pub result: Option<JsonValue>,
    pub error: Option<JsonValue>,
    pub request_date: DateTime<Utc>,
    pub response_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateProcessRequest {
    pub process_id: ProcessId,
    pub module_id: Option<ModuleId>,
    pub method: String,
    pub params: JsonValue,
    pub notification: bool,
}

/// How a module call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(JsonValue),
    Error(JsonValue),
}

impl ProcessRequest {
    pub fn new(input: CreateProcessRequest) -> Self {
        Self {
            id: ProcessRequestId::new(),
            process_id: input.process_id,
            module_id: input.module_id,
            method: input.method,
            params: Some(input.params),
            notification: input.notification,
            result: None,
            error: None,
            request_date: Utc::now(),
            response_date: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.response_date.is_none()
    }

    /// Applies an outcome in memory (used by the in-memory audit store).
    pub fn resolve(&mut self, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Success(value) => self.result = Some(value),
            RequestOutcome::Error(value) => self.error = Some(value),
        }
        self.response_date = Some(Utc::now());
    }

    pub async fn create(input: CreateProcessRequest, pool: &PgPool) -> Result<Self> {
        let request = Self::new(input);
        sqlx::query(
            "INSERT INTO process_request
                (id, process_id, module_id, method, params, notification, request_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(request.id)
        .bind(request.process_id)
        .bind(request.module_id)
        .bind(&request.method)
        .bind(&request.params)
        .bind(request.notification)
        .bind(request.request_date)
        .execute(pool)
        .await?;
        Ok(request)
    }

    pub async fn record_outcome(
        id: ProcessRequestId,
        outcome: RequestOutcome,
        pool: &PgPool,
    ) -> Result<()> {
        let (result, error) = match outcome {
            RequestOutcome::Success(value) => (Some(value), None),
            RequestOutcome::Error(value) => (None, Some(value)),
        };
        sqlx::query(
            "UPDATE process_request
             SET result = $2, error = $3, response_date = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(result)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_process(process_id: ProcessId, pool: &PgPool) -> Result<Vec<Self>> {
        let requests = sqlx::query_as::<_, Self>(
            "SELECT * FROM process_request WHERE process_id = $1 ORDER BY request_date",
        )
        .bind(process_id)
        .fetch_all(pool)
        .await?;
        Ok(requests)
    }
}
