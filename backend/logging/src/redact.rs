//! Log Redaction Layer
//!
//! Scrubs API keys and access tokens from strings prior to logging. Upstream
//! error bodies and request URLs pass through here before they reach a log line.

use regex::Regex;
use std::sync::LazyLock;

static BEARER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9\-\._~+/]+=*").unwrap());
static OPENAI_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-[a-zA-Z0-9_\-]{16,}").unwrap());
static GOOGLE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AIza[0-9A-Za-z_\-]{35}").unwrap());
static GOOGLE_OAUTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ya29\.[0-9A-Za-z_\-\.]+").unwrap());
static KEY_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([?&](?:key|access_token)=)[^&\s"']+"#).unwrap());

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = BEARER_RE.replace_all(input, "Bearer [REDACTED_TOKEN]");
    let redacted = KEY_PARAM_RE.replace_all(&redacted, "${1}[REDACTED]");
    let redacted = OPENAI_KEY_RE.replace_all(&redacted, "[REDACTED_KEY]");
    let redacted = GOOGLE_KEY_RE.replace_all(&redacted, "[REDACTED_KEY]");
    GOOGLE_OAUTH_RE
        .replace_all(&redacted, "[REDACTED_TOKEN]")
        .into_owned()
}
