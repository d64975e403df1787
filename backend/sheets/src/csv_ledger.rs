//! Local CSV ledger for running without Google credentials.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use slipscan_core::{header_row, ledger_row, CategoryTable, Cell, LedgerSink, Receipt, SlipError, SlipResult};
use tokio::sync::Mutex;
use tracing::debug;

pub struct CsvLedger {
    path: PathBuf,
    categories: CategoryTable,
    lock: Mutex<()>,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>, categories: CategoryTable) -> Self {
        Self {
            path: path.into(),
            categories,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append_rows(path: &Path, rows: &[Vec<Cell>]) -> SlipResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new().from_writer(file);
    let csv_err = |e: csv::Error| SlipError::Ledger(format!("csv write to {}: {e}", path.display()));
    if needs_header {
        writer
            .write_record(header_row().iter().map(Cell::to_text))
            .map_err(csv_err)?;
    }
    for row in rows {
        writer.write_record(row.iter().map(Cell::to_text)).map_err(csv_err)?;
    }
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl LedgerSink for CsvLedger {
    fn name(&self) -> &str {
        "csv"
    }

    async fn append_receipt(&self, receipt: &Receipt) -> SlipResult<()> {
        let row = ledger_row(receipt, &self.categories, Local::now().naive_local());
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_rows(&path, &[row]))
            .await
            .map_err(|e| SlipError::Other(e.into()))??;
        debug!(path = %self.path.display(), vendor = %receipt.vendor_name, "Row appended to CSV ledger");
        Ok(())
    }
}
