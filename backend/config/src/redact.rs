//! Config redaction: produce safe-to-log config snapshots by masking secrets.

use serde_json::Value;

use crate::schema::Config;

/// Field names that hold secrets.
static SECRET_KEYS: &[&str] = &[
    "api_secret_key",
    "gemini_api_key",
    "openai_api_key",
    "google_access_token",
    "worker_shared_secret",
];

fn is_sensitive_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
        || key.ends_with("_token")
        || key.ends_with("_secret")
}

/// Redact a JSON value, replacing sensitive string fields with a short hint.
pub fn redact(value: &Value) -> Value {
    redact_recursive(value, "")
}

fn redact_recursive(value: &Value, key: &str) -> Value {
    match value {
        Value::String(s) if is_sensitive_key(key) && !s.is_empty() => {
            // Preserve a hint: first 4 chars + ***
            let hint = if s.chars().count() > 8 {
                format!("{}***", s.chars().take(4).collect::<String>())
            } else {
                "***".to_string()
            };
            Value::String(hint)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| redact_recursive(v, key)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_recursive(v, k)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl Config {
    /// JSON snapshot of the config with secrets masked.
    pub fn redacted(&self) -> Value {
        redact(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}
