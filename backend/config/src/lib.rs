//! `slipscan-config`: runtime configuration for the receipt service.
//!
//! Provides:
//! - Typed config read from environment variables (optionally seeded from `.env`)
//! - Cross-field validation with errors and warnings
//! - Config redaction for safe logging

pub mod redact;
pub mod schema;
pub mod validation;

pub use redact::redact;
pub use schema::{
    Config, DispatchConfig, DispatchMode, LedgerConfig, StorageConfig, VisionConfig,
    VisionProviderKind,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use tracing::{error, warn};

/// Load `.env` (if present) into the process environment, then read and
/// validate the config.
///
/// Nothing is logged here since the logger is configured from the result;
/// call [`log_report`] once it is installed.
pub fn load() -> Result<(Config, ValidationReport), ConfigValidationError> {
    let dotenv_error = dotenvy::dotenv().err().filter(|e| !e.not_found());
    let config = Config::from_env()?;
    let mut report = validate(&config);
    if let Some(e) = dotenv_error {
        report.warnings.push(ConfigValidationError {
            path: ".env".to_string(),
            message: format!("failed to read .env file: {e}"),
        });
    }
    Ok((config, report))
}

/// Emit every validation finding through `tracing`.
pub fn log_report(report: &ValidationReport) {
    for warning in &report.warnings {
        warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        error!(path = %error.path, message = %error.message, "Config error");
    }
}
