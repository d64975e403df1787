use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One receipt handed to a queue: where the image lives and what the user
/// said about it.
///
/// The callback payload of earlier deployments was just
/// `{"image_url": .., "voice_note": ..}`; every other field defaults so those
/// tasks still deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptJob {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub image_url: String,
    #[serde(default)]
    pub blob_key: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub voice_note: Option<String>,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl ReceiptJob {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_url: image_url.into(),
            blob_key: None,
            content_type: None,
            voice_note: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_blob(mut self, key: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.blob_key = Some(key.into());
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_voice_note(mut self, note: Option<String>) -> Self {
        self.voice_note = note.filter(|n| !n.trim().is_empty());
        self
    }
}

/// Lifecycle of a job in the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "retrying" => Ok(JobStatus::Retrying),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Persisted view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub image_url: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub task_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a dispatcher hands back once a job is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatched {
    pub job_id: Uuid,
    pub task_name: String,
}

/// Where an uploaded blob ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub key: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_callback_payload_deserializes() {
        let job: ReceiptJob = serde_json::from_str(
            r#"{"image_url": "https://storage.googleapis.com/b/receipts/2024/a.jpg", "voice_note": null}"#,
        )
        .unwrap();
        assert_eq!(job.blob_key, None);
        assert_eq!(job.voice_note, None);
        assert!(!job.id.is_nil());
    }

    #[test]
    fn blank_voice_note_is_dropped() {
        let job = ReceiptJob::new("u").with_voice_note(Some("  ".into()));
        assert_eq!(job.voice_note, None);
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Retrying,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }
}
