//! Invocation history records and aggregates.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::summary::{sanitize_params, summarize_response};
use crate::mcp_client::types::InvokeResult;

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationLog {
    /// Row id; `None` until stored.
    pub id: Option<i64>,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub server_name: String,
    pub tool_name: String,
    /// Sanitized, capped JSON of the call parameters.
    pub parameters: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub response_summary: Option<String>,
    pub error: Option<String>,
}

impl InvocationLog {
    /// Build the history entry for a finished invocation, timestamped now.
    pub fn record(
        server_name: &str,
        tool_name: &str,
        params: Option<&Value>,
        outcome: &InvokeResult,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            parameters: sanitize_params(params),
            success: outcome.success,
            duration_ms,
            response_summary: summarize_response(outcome),
            error: outcome.error.clone(),
        }
    }
}

/// Aggregate statistics over the whole history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvocationStats {
    pub total_invocations: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage, two decimals.
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub by_tool: Vec<ToolStats>,
    pub by_server: Vec<ServerStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStats {
    pub server_name: String,
    pub tool_name: String,
    pub count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStats {
    pub server_name: String,
    pub count: u64,
    pub success_count: u64,
    pub success_rate: f64,
}

/// A recurring sequence of consecutive calls, e.g. `fs/read → fs/write`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationPattern {
    pub sequence: String,
    pub occurrences: u64,
    /// Occurrences in which every call of the sequence succeeded.
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
}

/// Percentage of `part` in `total`, rounded to two decimals. Zero when empty.
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
