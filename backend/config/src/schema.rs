//! Typed runtime configuration, read from environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::validation::ConfigValidationError;

/// Which vision model vendor extracts receipt data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionProviderKind {
    Gemini,
    OpenAi,
}

impl VisionProviderKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            VisionProviderKind::Gemini => "gemini-2.0-flash",
            VisionProviderKind::OpenAi => "gpt-4o",
        }
    }
}

impl FromStr for VisionProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            other => Err(format!("unknown vision provider '{other}'; use 'gemini' or 'openai'")),
        }
    }
}

/// How uploaded receipts reach the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Process inside the upload request.
    Inline,
    /// In-process queue drained by a background worker task.
    Local,
    /// Google Cloud Tasks calling back into `/process-receipt`.
    CloudTasks,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DispatchMode::Inline => "inline",
            DispatchMode::Local => "local",
            DispatchMode::CloudTasks => "cloud_tasks",
        })
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "inline" | "sync" => Ok(Self::Inline),
            "local" | "queue" => Ok(Self::Local),
            "cloud_tasks" | "cloudtasks" => Ok(Self::CloudTasks),
            other => Err(format!(
                "unknown dispatch mode '{other}'; use 'inline', 'local' or 'cloud_tasks'"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub provider: VisionProviderKind,
    pub model: String,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Run adaptive thresholding before sending the image.
    pub preprocess: bool,
}

impl VisionConfig {
    /// Key for the selected provider.
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            VisionProviderKind::Gemini => self.gemini_api_key.as_deref(),
            VisionProviderKind::OpenAi => self.openai_api_key.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// GCS bucket; local disk is used when unset.
    pub gcs_bucket: Option<String>,
    pub gcs_make_public: bool,
    pub local_media_dir: PathBuf,
    pub google_access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Google Sheet URL; a local CSV file is used when unset.
    pub google_sheet_url: Option<String>,
    pub csv_path: PathBuf,
    pub categories_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub gcp_project_id: Option<String>,
    pub gcp_queue_location: Option<String>,
    pub gcp_queue_name: Option<String>,
    pub worker_url: Option<String>,
    pub worker_shared_secret: Option<String>,
    pub queue_capacity: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

/// Slipscan runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    /// SQLite job store path
    pub db_path: String,
    /// Base URL used to build links to locally stored images
    pub public_base_url: String,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    /// Required `X-API-Key` value for uploads
    pub api_secret_key: Option<String>,
    pub max_upload_bytes: usize,

    pub vision: VisionConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port: u16 = match var("SLIPSCAN_PORT").or_else(|| var("PORT")) {
            Some(raw) => parse("SLIPSCAN_PORT", &raw)?,
            None => 8080,
        };

        let provider: VisionProviderKind = match var("VISION_PROVIDER") {
            Some(raw) => parse("VISION_PROVIDER", &raw)?,
            None => VisionProviderKind::Gemini,
        };

        let mode: DispatchMode = match var("DISPATCH_MODE") {
            Some(raw) => parse("DISPATCH_MODE", &raw)?,
            None => DispatchMode::Local,
        };

        Ok(Self {
            bind_address: var("SLIPSCAN_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            db_path: var("SLIPSCAN_DB").unwrap_or_else(|| "slipscan.db".to_string()),
            public_base_url: var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}"))
                .trim_end_matches('/')
                .to_string(),
            log_level: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_dir: var("SLIPSCAN_LOG_DIR").map(PathBuf::from),
            api_secret_key: var("API_SECRET_KEY"),
            max_upload_bytes: parse_or(&var, "MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,

            vision: VisionConfig {
                provider,
                model: var("VISION_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
                gemini_api_key: var("GEMINI_API_KEY"),
                openai_api_key: var("OPENAI_API_KEY"),
                preprocess: parse_flag(&var, "PREPROCESS_IMAGES", true)?,
            },
            storage: StorageConfig {
                gcs_bucket: var("GCS_BUCKET_NAME"),
                gcs_make_public: parse_flag(&var, "GCS_MAKE_PUBLIC", true)?,
                local_media_dir: var("LOCAL_MEDIA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("media")),
                google_access_token: var("GOOGLE_ACCESS_TOKEN"),
            },
            ledger: LedgerConfig {
                google_sheet_url: var("GOOGLE_SHEET_URL"),
                csv_path: var("LEDGER_CSV_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("receipts.csv")),
                categories_file: var("SLIPSCAN_CATEGORIES_FILE").map(PathBuf::from),
            },
            dispatch: DispatchConfig {
                mode,
                gcp_project_id: var("GCP_PROJECT_ID"),
                gcp_queue_location: var("GCP_QUEUE_LOCATION"),
                gcp_queue_name: var("GCP_QUEUE_NAME"),
                worker_url: var("WORKER_URL"),
                worker_shared_secret: var("WORKER_SHARED_SECRET"),
                queue_capacity: parse_or(&var, "QUEUE_CAPACITY", 256)?,
                retry_max_attempts: parse_or(&var, "RETRY_MAX_ATTEMPTS", 5)?,
                retry_base_delay_ms: parse_or(&var, "RETRY_BASE_DELAY_MS", 2_000)?,
                retry_max_delay_ms: parse_or(&var, "RETRY_MAX_DELAY_MS", 60_000)?,
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigValidationError>
where
    T::Err: fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigValidationError {
        path: name.to_string(),
        message: format!("invalid value '{raw}': {e}"),
    })
}

fn parse_or<T, V>(var: &V, name: &str, default: T) -> Result<T, ConfigValidationError>
where
    T: FromStr,
    T::Err: fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => parse(name, &raw),
        None => Ok(default),
    }
}

fn parse_flag<V>(var: &V, name: &str, default: bool) -> Result<bool, ConfigValidationError>
where
    V: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(name) else { return Ok(default) };
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigValidationError {
            path: name.to_string(),
            message: format!("expected a boolean, got '{raw}'"),
        }),
    }
}
