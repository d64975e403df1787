//! Blob key naming.

use chrono::{Datelike, Utc};
use uuid::Uuid;

/// Reduce an uploaded filename to a safe basename.
///
/// Directory components are dropped and anything outside `[A-Za-z0-9._-]`
/// becomes `_`. An empty result becomes `upload`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// `receipts/{year}/{uuid}_{filename}` for a fresh upload.
pub fn receipt_blob_key(filename: &str) -> String {
    receipt_blob_key_with(Utc::now().year(), Uuid::new_v4(), filename)
}

pub fn receipt_blob_key_with(year: i32, id: Uuid, filename: &str) -> String {
    format!("receipts/{year}/{id}_{}", sanitize_filename(filename))
}
