//! Ledger row layout shared by every spreadsheet sink.

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::categorize::CategoryTable;
use crate::types::{LineItem, Receipt};

/// Column headers, in row order.
pub const LEDGER_HEADER: [&str; 12] = [
    "Date",
    "Vendor",
    "Category",
    "Total",
    "Subtotal",
    "Tax",
    "Payment Method",
    "Voice Note",
    "Items",
    "Receipt #",
    "Image URL",
    "Timestamp",
];

/// A single spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(value: Option<&str>) -> Self {
        match value {
            Some(s) => Cell::Text(s.to_string()),
            None => Cell::Empty,
        }
    }

    fn number(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or(Cell::Empty)
    }

    /// JSON form for the Sheets values API. Numbers stay numbers so the sheet
    /// can sum them.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Empty => Value::String(String::new()),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(String::new())),
        }
    }

    /// Plain-text form for CSV output.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
        }
    }
}

/// Render a quantity the way a float prints: `2.0`, `1.5`.
fn format_quantity(q: f64) -> String {
    if q.fract() == 0.0 && q.abs() < 1e16 {
        format!("{q:.1}")
    } else {
        q.to_string()
    }
}

/// Summarize purchased lines as `Milk (2.0 @ $3.50); Bread (1.0 @ $2.99)`.
///
/// Lines without a description, quantity or unit price (or with a zero
/// quantity or price) are left out.
pub fn format_items(items: &[LineItem]) -> String {
    items
        .iter()
        .filter_map(|item| {
            let qty = item.quantity.filter(|q| *q != 0.0)?;
            let price = item.unit_price.filter(|p| *p != 0.0)?;
            if item.description.is_empty() {
                return None;
            }
            Some(format!(
                "{} ({} @ ${:.2})",
                item.description,
                format_quantity(qty),
                price
            ))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Build the ledger row for a receipt, stamped with `processed_at`.
pub fn ledger_row(receipt: &Receipt, table: &CategoryTable, processed_at: NaiveDateTime) -> Vec<Cell> {
    let category = receipt
        .primary_category
        .clone()
        .unwrap_or_else(|| table.categorize(&receipt.vendor_name).to_string());
    let items = receipt
        .item_summary
        .clone()
        .unwrap_or_else(|| format_items(&receipt.items));

    vec![
        Cell::text(receipt.date.map(|d| d.format("%Y-%m-%d").to_string()).as_deref()),
        Cell::Text(receipt.vendor_name.clone()),
        Cell::Text(category),
        Cell::Number(receipt.total),
        Cell::number(receipt.subtotal),
        Cell::number(receipt.tax),
        Cell::text(receipt.payment_method.as_deref()),
        Cell::text(receipt.voice_note.as_deref()),
        Cell::Text(items),
        Cell::text(receipt.receipt_number.as_deref()),
        Cell::text(receipt.image_url.as_deref()),
        Cell::Text(processed_at.format("%Y-%m-%d %H:%M:%S").to_string()),
    ]
}

/// The header row as cells.
pub fn header_row() -> Vec<Cell> {
    LEDGER_HEADER.iter().map(|h| Cell::Text(h.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn item(desc: &str, qty: Option<f64>, price: Option<f64>) -> LineItem {
        LineItem {
            description: desc.into(),
            quantity: qty,
            unit_price: price,
            total: None,
        }
    }

    #[test]
    fn items_skip_incomplete_lines() {
        let items = vec![
            item("Milk", Some(2.0), Some(3.5)),
            item("Gum", None, Some(1.0)),
            item("", Some(1.0), Some(1.0)),
            item("Bag", Some(1.0), Some(0.0)),
            item("Apples", Some(1.5), Some(2.0)),
        ];
        assert_eq!(format_items(&items), "Milk (2.0 @ $3.50); Apples (1.5 @ $2.00)");
    }

    #[test]
    fn row_has_header_width_and_order() {
        let mut receipt = Receipt::new("Shell", 45.2);
        receipt.date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(8, 30, 0);
        receipt.tax = Some(3.1);
        receipt.voice_note = Some("fleet car".into());
        receipt.image_url = Some("https://img/a.jpg".into());
        let at = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap().and_hms_opt(9, 0, 1).unwrap();

        let row = ledger_row(&receipt, &CategoryTable::default(), at);
        assert_eq!(row.len(), LEDGER_HEADER.len());
        assert_eq!(row[0], Cell::Text("2024-05-01".into()));
        assert_eq!(row[2], Cell::Text("Gas/Fuel".into()));
        assert_eq!(row[3], Cell::Number(45.2));
        assert_eq!(row[4], Cell::Empty);
        assert_eq!(row[5], Cell::Number(3.1));
        assert_eq!(row[7], Cell::Text("fleet car".into()));
        assert_eq!(row[10], Cell::Text("https://img/a.jpg".into()));
        assert_eq!(row[11], Cell::Text("2024-05-02 09:00:01".into()));
    }

    #[test]
    fn row_prefers_enriched_fields() {
        let mut receipt = Receipt::new("Shell", 1.0);
        receipt.primary_category = Some("Travel".into());
        receipt.item_summary = Some("precomputed".into());
        let at = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let row = ledger_row(&receipt, &CategoryTable::default(), at);
        assert_eq!(row[2], Cell::Text("Travel".into()));
        assert_eq!(row[8], Cell::Text("precomputed".into()));
    }

    #[test]
    fn cells_render_to_json_and_text() {
        assert_eq!(Cell::Number(12.5).to_json(), serde_json::json!(12.5));
        assert_eq!(Cell::Empty.to_json(), serde_json::json!(""));
        assert_eq!(Cell::Number(12.0).to_text(), "12");
        assert_eq!(Cell::Text("x".into()).to_text(), "x");
    }
}
