//! Google Sheets ledger over the Sheets API v4.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde::Deserialize;
use serde_json::Value;
use slipscan_core::{
    header_row, ledger_row, CategoryTable, Cell, LedgerSink, Receipt, SlipError, SlipResult,
    TokenSource,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

const SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com";

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct GoogleSheetsLedger {
    client: reqwest::Client,
    spreadsheet_id: String,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
    categories: CategoryTable,
    /// Set once the header row is known to exist. Also serializes appends.
    header_ready: Mutex<bool>,
}

impl GoogleSheetsLedger {
    pub fn new(
        client: reqwest::Client,
        spreadsheet_id: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        categories: CategoryTable,
    ) -> Self {
        Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
            endpoint: SHEETS_ENDPOINT.to_string(),
            tokens,
            categories,
            header_ready: Mutex::new(false),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self, suffix: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{suffix}",
            self.endpoint,
            urlencoding::encode(&self.spreadsheet_id)
        )
    }

    async fn first_row_is_empty(&self, token: &str) -> SlipResult<bool> {
        let resp = self
            .client
            .get(self.values_url("A1:L1"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SlipError::transport("sheets", e))?;
        let resp = check_status(resp).await?;
        let range: ValueRange = resp
            .json()
            .await
            .map_err(|e| SlipError::Ledger(format!("unexpected Sheets response: {e}")))?;
        Ok(range
            .values
            .first()
            .map_or(true, |row| row.iter().all(|v| v.as_str().is_some_and(str::is_empty))))
    }

    async fn append(&self, token: &str, row: Vec<Cell>) -> SlipResult<()> {
        let body = serde_json::json!({
            "values": [row.iter().map(Cell::to_json).collect::<Vec<_>>()]
        });
        let resp = self
            .client
            .post(self.values_url("A1:append"))
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SlipError::transport("sheets", e))?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> SlipResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SlipError::upstream("sheets", status.as_u16(), body))
}

#[async_trait]
impl LedgerSink for GoogleSheetsLedger {
    fn name(&self) -> &str {
        "google_sheets"
    }

    async fn append_receipt(&self, receipt: &Receipt) -> SlipResult<()> {
        let token = self.tokens.access_token().await?;
        let mut header_ready = self.header_ready.lock().await;
        if !*header_ready {
            if self.first_row_is_empty(&token).await? {
                info!(spreadsheet = %self.spreadsheet_id, "Sheet is empty, writing header row");
                self.append(&token, header_row()).await?;
            }
            *header_ready = true;
        }
        let row = ledger_row(receipt, &self.categories, Local::now().naive_local());
        self.append(&token, row).await?;
        debug!(spreadsheet = %self.spreadsheet_id, vendor = %receipt.vendor_name, "Row appended to sheet");
        Ok(())
    }
}
