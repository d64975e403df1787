//! Config validation: cross-field checks with user-friendly error messages.

use crate::schema::{Config, DispatchMode, VisionProviderKind};
use thiserror::Error;

/// A config validation error with the offending variable and a message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &Config) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_vision(config, &mut report);
    validate_dispatch(config, &mut report);
    report
}

fn validate_server(config: &Config, report: &mut ValidationReport) {
    if config.api_secret_key.is_none() {
        report.warn("API_SECRET_KEY", "No API key configured; every upload will be rejected");
    }
    if config.max_upload_bytes == 0 {
        report.error("MAX_UPLOAD_BYTES", "Upload limit must be > 0");
    }
    if config.port < 1024 && config.port != 80 && config.port != 443 {
        report.warn(
            "SLIPSCAN_PORT",
            format!("Port {} requires elevated privileges; consider using a port >= 1024", config.port),
        );
    }
}

fn validate_vision(config: &Config, report: &mut ValidationReport) {
    if config.vision.api_key().is_none() {
        let var = match config.vision.provider {
            VisionProviderKind::Gemini => "GEMINI_API_KEY",
            VisionProviderKind::OpenAi => "OPENAI_API_KEY",
        };
        report.error(var, "API key for the selected vision provider is required");
    }
    if config.vision.model.trim().is_empty() {
        report.error("VISION_MODEL", "Model name cannot be empty");
    }
}

fn validate_dispatch(config: &Config, report: &mut ValidationReport) {
    let dispatch = &config.dispatch;
    if dispatch.retry_max_attempts == 0 {
        report.error("RETRY_MAX_ATTEMPTS", "At least one attempt is required");
    }
    if dispatch.retry_base_delay_ms > dispatch.retry_max_delay_ms {
        report.warn("RETRY_BASE_DELAY_MS", "Base delay exceeds the max delay; every retry waits the max");
    }
    if dispatch.queue_capacity == 0 {
        report.error("QUEUE_CAPACITY", "Queue capacity must be >= 1");
    }

    if let Some(url) = &dispatch.worker_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            report.error("WORKER_URL", format!("Worker URL must be http(s), got '{url}'"));
        }
    }

    if dispatch.mode != DispatchMode::CloudTasks {
        return;
    }
    for (var, value) in [
        ("GCP_PROJECT_ID", &dispatch.gcp_project_id),
        ("GCP_QUEUE_LOCATION", &dispatch.gcp_queue_location),
        ("GCP_QUEUE_NAME", &dispatch.gcp_queue_name),
        ("WORKER_URL", &dispatch.worker_url),
    ] {
        if value.is_none() {
            report.error(var, "Required when DISPATCH_MODE=cloud_tasks");
        }
    }
    if config.storage.gcs_bucket.is_none() {
        report.warn(
            "GCS_BUCKET_NAME",
            "Cloud Tasks workers will read images from local disk; they must share LOCAL_MEDIA_DIR",
        );
    }
    if dispatch.worker_shared_secret.is_none() {
        report.warn("WORKER_SHARED_SECRET", "The /process-receipt callback is unauthenticated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| env.get(name).cloned()).unwrap()
    }

    #[test]
    fn minimal_local_config_is_valid() {
        let report = validate(&config(&[("GEMINI_API_KEY", "k"), ("API_SECRET_KEY", "s")]));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    }

    #[test]
    fn missing_provider_key_is_error() {
        let report = validate(&config(&[("VISION_PROVIDER", "openai"), ("GEMINI_API_KEY", "k")]));
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "OPENAI_API_KEY");
    }

    #[test]
    fn cloud_tasks_needs_queue_coordinates() {
        let report = validate(&config(&[
            ("GEMINI_API_KEY", "k"),
            ("DISPATCH_MODE", "cloud_tasks"),
            ("GCP_PROJECT_ID", "proj"),
        ]));
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["GCP_QUEUE_LOCATION", "GCP_QUEUE_NAME", "WORKER_URL"]);
    }

    #[test]
    fn missing_api_key_is_only_a_warning() {
        let report = validate(&config(&[("GEMINI_API_KEY", "k")]));
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.path == "API_SECRET_KEY"));
    }

    #[test]
    fn worker_url_must_be_http() {
        let report = validate(&config(&[("GEMINI_API_KEY", "k"), ("WORKER_URL", "ftp://x")]));
        assert!(report.errors.iter().any(|e| e.path == "WORKER_URL"));
    }
}
