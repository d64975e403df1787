pub mod csv_ledger;
pub mod google;
pub mod sheet_url;

pub use csv_ledger::CsvLedger;
pub use google::GoogleSheetsLedger;
pub use sheet_url::spreadsheet_id_from_url;
