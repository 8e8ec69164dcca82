//! Invocation history endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use super::error::ApiError;
use super::AppState;
use crate::invocation_log::{
    InvocationLog, InvocationLogger, InvocationPattern, InvocationStats, LogStoreError,
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
}

/// Run a store query on the blocking pool.
async fn query<T, F>(logger: Arc<dyn InvocationLogger>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn InvocationLogger) -> Result<T, LogStoreError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || f(logger.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(format!("log query task failed: {e}")))?;
    Ok(result?)
}

/// GET /logs?limit=N (clamped to 1..=500, default 50)
pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<Vec<InvocationLog>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;
    let logs = query(state.logger, move |logger| logger.recent(limit)).await?;
    Ok(Json(logs))
}

/// GET /logs/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<InvocationStats>, ApiError> {
    Ok(Json(query(state.logger, |logger| logger.stats()).await?))
}

/// GET /logs/patterns
pub async fn patterns(
    State(state): State<AppState>,
) -> Result<Json<Vec<InvocationPattern>>, ApiError> {
    Ok(Json(query(state.logger, |logger| logger.patterns()).await?))
}
