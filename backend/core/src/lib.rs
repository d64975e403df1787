pub mod categorize;
pub mod error;
pub mod job;
pub mod row;
pub mod traits;
pub mod types;

pub use categorize::{CategoryRule, CategoryTable, FALLBACK_CATEGORY};
pub use error::{SlipError, SlipResult};
pub use job::{Dispatched, JobRecord, JobStatus, ReceiptJob, StoredBlob};
pub use row::{format_items, header_row, ledger_row, Cell, LEDGER_HEADER};
pub use traits::{BlobStore, JobDispatcher, LedgerSink, ReceiptParser, TokenSource};
pub use types::{parse_amount, parse_datetime, LineItem, Receipt};
