//! Structured logging for Slipscan.
//!
//! Handles subscriber setup (console + rolling JSON file), secret redaction,
//! and the per-job pipeline event log.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{log_event, PipelineEvent};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
