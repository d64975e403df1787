//! Builds the service graph from config.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use slipscan_config::{Config, DispatchMode, VisionProviderKind};
use slipscan_core::{BlobStore, CategoryTable, JobDispatcher, LedgerSink, TokenSource};
use slipscan_scheduler::{
    CloudTasksDispatcher, InlineDispatcher, JobStore, LocalQueueDispatcher, QueuePath,
    ReceiptWorker, RetryPolicy,
};
use slipscan_sheets::{spreadsheet_id_from_url, CsvLedger, GoogleSheetsLedger};
use slipscan_storage::{GcsBlobStore, LocalBlobStore, MetadataServerToken, StaticToken};
use slipscan_understanding::{LlmReceiptParser, VisionProvider};
use tokio::task::JoinHandle;
use tracing::info;

pub struct Components {
    pub blobs: Arc<dyn BlobStore>,
    pub jobs: Arc<JobStore>,
    pub worker: Arc<ReceiptWorker>,
    /// Set when images live on local disk and must be served by this process.
    pub media_dir: Option<PathBuf>,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

fn token_source(config: &Config, http: &reqwest::Client) -> Arc<dyn TokenSource> {
    match &config.storage.google_access_token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(MetadataServerToken::new(http.clone())),
    }
}

pub fn build_parser(config: &Config, http: &reqwest::Client) -> Result<LlmReceiptParser> {
    let key = config
        .vision
        .api_key()
        .ok_or_else(|| anyhow!("no API key configured for vision provider {:?}", config.vision.provider))?;
    let provider = match config.vision.provider {
        VisionProviderKind::Gemini => VisionProvider::gemini(key, &config.vision.model),
        VisionProviderKind::OpenAi => VisionProvider::openai(key, &config.vision.model),
    };
    info!(provider = provider.name(), model = provider.model(), "Vision provider ready");
    Ok(LlmReceiptParser::new(provider)
        .with_client(http.clone())
        .with_preprocessing(config.vision.preprocess))
}

pub async fn build_components(config: &Config) -> Result<Components> {
    let http = reqwest::Client::new();
    let tokens = token_source(config, &http);

    let (blobs, media_dir): (Arc<dyn BlobStore>, Option<PathBuf>) = match &config.storage.gcs_bucket {
        Some(bucket) => {
            info!(bucket = %bucket, "Storing receipt images in GCS");
            let store = GcsBlobStore::new(http.clone(), bucket, config.storage.gcs_make_public, tokens.clone());
            (Arc::new(store), None)
        }
        None => {
            let dir = config.storage.local_media_dir.clone();
            info!(dir = %dir.display(), "Storing receipt images on local disk");
            (Arc::new(LocalBlobStore::new(&dir, &config.public_base_url)), Some(dir))
        }
    };

    let categories = match &config.ledger.categories_file {
        Some(path) => CategoryTable::load(path).await?,
        None => CategoryTable::default(),
    };

    let ledger: Arc<dyn LedgerSink> = match &config.ledger.google_sheet_url {
        Some(url) => {
            let id = spreadsheet_id_from_url(url)
                .ok_or_else(|| anyhow!("GOOGLE_SHEET_URL is not a Google Sheets URL: {url}"))?;
            info!(spreadsheet = %id, "Appending receipts to Google Sheets");
            Arc::new(GoogleSheetsLedger::new(http.clone(), id, tokens.clone(), categories.clone()))
        }
        None => {
            info!(path = %config.ledger.csv_path.display(), "Appending receipts to CSV ledger");
            Arc::new(CsvLedger::new(&config.ledger.csv_path, categories.clone()))
        }
    };

    let jobs = Arc::new(
        JobStore::open(std::path::Path::new(&config.db_path))
            .with_context(|| format!("open job store {}", config.db_path))?,
    );
    let parser = Arc::new(build_parser(config, &http)?);
    let worker = Arc::new(
        ReceiptWorker::new(parser, ledger, blobs.clone(), jobs.clone(), Arc::new(categories))
            .with_http_client(http.clone()),
    );

    Ok(Components {
        blobs,
        jobs,
        worker,
        media_dir,
        http,
        tokens,
    })
}

impl Components {
    /// The dispatcher for the configured mode, plus the local queue task when
    /// one was started.
    pub fn dispatcher(&self, config: &Config) -> Result<(Arc<dyn JobDispatcher>, Option<JoinHandle<()>>)> {
        let dispatch = &config.dispatch;
        match dispatch.mode {
            DispatchMode::Inline => Ok((Arc::new(InlineDispatcher::new(self.worker.clone())), None)),
            DispatchMode::Local => {
                let policy = RetryPolicy::new(
                    dispatch.retry_max_attempts,
                    dispatch.retry_base_delay_ms,
                    dispatch.retry_max_delay_ms,
                );
                let (dispatcher, handle) =
                    LocalQueueDispatcher::start(self.worker.clone(), policy, dispatch.queue_capacity);
                Ok((Arc::new(dispatcher), Some(handle)))
            }
            DispatchMode::CloudTasks => {
                let required = |value: &Option<String>, name: &str| {
                    value.clone().ok_or_else(|| anyhow!("{name} is required for cloud_tasks dispatch"))
                };
                let queue = QueuePath {
                    project: required(&dispatch.gcp_project_id, "GCP_PROJECT_ID")?,
                    location: required(&dispatch.gcp_queue_location, "GCP_QUEUE_LOCATION")?,
                    queue: required(&dispatch.gcp_queue_name, "GCP_QUEUE_NAME")?,
                };
                let dispatcher = CloudTasksDispatcher::new(
                    self.http.clone(),
                    self.tokens.clone(),
                    queue,
                    required(&dispatch.worker_url, "WORKER_URL")?,
                    dispatch.worker_shared_secret.clone(),
                    self.jobs.clone(),
                );
                Ok((Arc::new(dispatcher), None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(dir: &std::path::Path, pairs: &[(&str, &str)]) -> Config {
        let mut env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.insert("GEMINI_API_KEY".into(), "test-key".into());
        env.insert("SLIPSCAN_DB".into(), dir.join("jobs.db").display().to_string());
        env.insert("LOCAL_MEDIA_DIR".into(), dir.join("media").display().to_string());
        env.insert("LEDGER_CSV_PATH".into(), dir.join("receipts.csv").display().to_string());
        Config::from_lookup(|name| env.get(name).cloned()).unwrap()
    }

    #[tokio::test]
    async fn local_defaults_wire_up() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &[("DISPATCH_MODE", "inline")]);
        let components = build_components(&cfg).await.unwrap();
        assert_eq!(components.blobs.name(), "local");
        assert!(components.media_dir.is_some());
        let (dispatcher, handle) = components.dispatcher(&cfg).unwrap();
        assert_eq!(dispatcher.name(), "inline");
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn local_queue_starts_worker() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &[]);
        let components = build_components(&cfg).await.unwrap();
        let (dispatcher, handle) = components.dispatcher(&cfg).unwrap();
        assert_eq!(dispatcher.name(), "local");
        assert!(handle.is_some());
    }

    #[tokio::test]
    async fn gcs_and_sheets_selected_by_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(
            dir.path(),
            &[
                ("GCS_BUCKET_NAME", "bkt"),
                ("GOOGLE_ACCESS_TOKEN", "ya29.x"),
                ("GOOGLE_SHEET_URL", "https://docs.google.com/spreadsheets/d/abc/edit"),
                ("DISPATCH_MODE", "cloud_tasks"),
                ("GCP_PROJECT_ID", "p"),
                ("GCP_QUEUE_LOCATION", "l"),
                ("GCP_QUEUE_NAME", "q"),
                ("WORKER_URL", "https://w/process-receipt"),
            ],
        );
        let components = build_components(&cfg).await.unwrap();
        assert_eq!(components.blobs.name(), "gcs");
        assert!(components.media_dir.is_none());
        let (dispatcher, _) = components.dispatcher(&cfg).unwrap();
        assert_eq!(dispatcher.name(), "cloud_tasks");
    }

    #[tokio::test]
    async fn bad_sheet_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &[("GOOGLE_SHEET_URL", "https://example.com/not-a-sheet")]);
        assert!(build_components(&cfg).await.is_err());
    }
}
