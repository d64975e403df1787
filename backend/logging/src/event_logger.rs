//! Pipeline Event Logger
//!
//! One structured line per pipeline step of a receipt job, emitted under the
//! `receipt_events` target so they can be filtered out of the general log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Stored {
        key: String,
        url: String,
        size_bytes: usize,
    },
    Dispatched {
        dispatcher: String,
        task_name: String,
    },
    Parsed {
        parser: String,
        vendor: String,
        total: f64,
    },
    Appended {
        ledger: String,
    },
    Duplicate,
    Failed {
        stage: String,
        error: String,
        retryable: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

/// Emit a pipeline event for `job_id`. Error text is redacted first.
pub fn log_event(job_id: Uuid, mut event: PipelineEvent) {
    if let PipelineEvent::Failed { error, .. } = &mut event {
        *error = redact_sensitive_data(error);
    }
    let failed = matches!(event, PipelineEvent::Failed { .. });

    let entry = EventLogEntry {
        job_id,
        timestamp: Utc::now(),
        event,
    };
    let line = serde_json::to_string(&entry).unwrap_or_default();

    if failed {
        warn!(target: "receipt_events", job_id = %job_id, event = %line, "Receipt job event");
    } else {
        info!(target: "receipt_events", job_id = %job_id, event = %line, "Receipt job event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(PipelineEvent::Appended { ledger: "csv".into() }).unwrap();
        assert_eq!(json["type"], "appended");
        assert_eq!(json["ledger"], "csv");
    }

    #[test]
    fn logging_a_failure_does_not_panic_without_subscriber() {
        log_event(
            Uuid::new_v4(),
            PipelineEvent::Failed {
                stage: "parse".into(),
                error: "Bearer abc.def".into(),
                retryable: true,
            },
        );
    }
}
