/// Extract the spreadsheet id from a Google Sheets URL.
///
/// `https://docs.google.com/spreadsheets/d/{id}/edit#gid=0` yields `{id}`.
/// Anything without `/spreadsheets/d/` is treated as a bare id.
pub fn spreadsheet_id_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    let id = match url.split_once("/spreadsheets/d/") {
        Some((_, rest)) => rest.split(['/', '?', '#']).next().unwrap_or(""),
        None if url.contains('/') => return None,
        None => url,
    };
    (!id.is_empty()).then(|| id.to_string())
}
