//! Parameter sanitising and response summaries for history entries.

use serde_json::{Map, Value};

use crate::mcp_client::types::InvokeResult;
use crate::text::truncate_with_ellipsis;

/// Maximum stored length of serialized parameters.
pub const PARAMS_SUMMARY_CHARS: usize = 500;

/// Maximum stored length of a response summary.
pub const RESPONSE_SUMMARY_CHARS: usize = 200;

const REDACTED: &str = "[REDACTED]";

/// Parameter names containing any of these (case-insensitive) are redacted.
const SENSITIVE_KEYS: [&str; 8] = [
    "password",
    "token",
    "secret",
    "key",
    "api_key",
    "apikey",
    "auth",
    "credential",
];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Serialize tool parameters for storage, redacting sensitive top-level keys.
/// `None` when there are no parameters.
pub fn sanitize_params(params: Option<&Value>) -> Option<String> {
    let json = match params? {
        Value::Null => return None,
        Value::Object(map) if map.is_empty() => return None,
        Value::Object(map) => {
            let sanitized: Map<String, Value> = map
                .iter()
                .map(|(key, value)| {
                    if is_sensitive(key) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), value.clone())
                    }
                })
                .collect();
            Value::Object(sanitized).to_string()
        }
        other => other.to_string(),
    };
    Some(truncate_with_ellipsis(&json, PARAMS_SUMMARY_CHARS))
}

/// Short JSON rendering of an invocation's result payload.
pub fn summarize_response(result: &InvokeResult) -> Option<String> {
    result
        .result
        .as_ref()
        .map(|value| truncate_with_ellipsis(&value.to_string(), RESPONSE_SUMMARY_CHARS))
}
