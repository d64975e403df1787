use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SlipResult;
use crate::job::{Dispatched, ReceiptJob, StoredBlob};
use crate::types::Receipt;

/// Durable storage for raw receipt images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name for logs and health output (e.g. "gcs", "local").
    fn name(&self) -> &str;

    /// Store `data` under `key` and return where it can be fetched from.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> SlipResult<StoredBlob>;

    /// Read a previously stored blob back.
    async fn get(&self, key: &str) -> SlipResult<Bytes>;
}

/// Turns a receipt image into structured data.
#[async_trait]
pub trait ReceiptParser: Send + Sync {
    fn name(&self) -> &str;

    async fn parse(&self, image: &[u8], mime_type: &str) -> SlipResult<Receipt>;
}

/// The spreadsheet (or spreadsheet-like file) receipts are recorded in.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    fn name(&self) -> &str;

    async fn append_receipt(&self, receipt: &Receipt) -> SlipResult<()>;
}

/// Hands a job to whatever runs it: the caller itself, an in-process queue,
/// or a managed task queue.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, job: ReceiptJob) -> SlipResult<Dispatched>;
}

/// OAuth bearer tokens for Google APIs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> SlipResult<String>;
}
