use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "de::opt_amount")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_amount")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_amount")]
    pub total: Option<f64>,
}

/// Structured data extracted from a receipt image, plus the enrichment
/// fields filled in before the receipt is written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub vendor_name: String,
    #[serde(deserialize_with = "de::amount")]
    pub total: f64,
    #[serde(default, deserialize_with = "de::opt_datetime")]
    pub date: Option<NaiveDateTime>,

    #[serde(default)]
    pub vendor_address: Option<String>,
    #[serde(default)]
    pub receipt_number: Option<String>,
    #[serde(default, deserialize_with = "de::opt_amount")]
    pub subtotal: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_amount")]
    pub tax: Option<f64>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default, deserialize_with = "de::items")]
    pub items: Vec<LineItem>,

    #[serde(default)]
    pub voice_note: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub item_summary: Option<String>,
    #[serde(default)]
    pub primary_category: Option<String>,
    #[serde(default)]
    pub actionable_flag: bool,
}

impl Receipt {
    pub fn new(vendor_name: impl Into<String>, total: f64) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            total,
            date: None,
            vendor_address: None,
            receipt_number: None,
            subtotal: None,
            tax: None,
            payment_method: None,
            items: Vec::new(),
            voice_note: None,
            batch_id: None,
            created_at: Utc::now(),
            image_url: None,
            item_summary: None,
            primary_category: None,
            actionable_flag: false,
        }
    }

    /// Attach where the image lives and the note the user recorded with it.
    /// A blank voice note leaves any existing note untouched.
    pub fn attach_source(&mut self, image_url: &str, voice_note: Option<&str>) {
        self.image_url = Some(image_url.to_string());
        if let Some(note) = voice_note.map(str::trim).filter(|n| !n.is_empty()) {
            self.voice_note = Some(note.to_string());
        }
    }
}

/// Parse a money amount the way receipts and LLMs tend to write it:
/// `12.5`, `"12.50"`, `"$1,204.99"`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(['$', '€', '£', '¥'])
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the date formats seen in extraction output.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

mod de {
    use super::*;
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    pub fn amount<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Amount::deserialize(d)? {
            Amount::Number(v) => Ok(v),
            Amount::Text(s) => {
                parse_amount(&s).ok_or_else(|| D::Error::custom(format!("invalid amount: {s:?}")))
            }
        }
    }

    /// Optional amounts are lenient: anything unreadable becomes `None`.
    pub fn opt_amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Option::<serde_json::Value>::deserialize(d)? {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => parse_amount(&s),
            _ => None,
        })
    }

    pub fn opt_datetime<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        Ok(match Option::<serde_json::Value>::deserialize(d)? {
            Some(serde_json::Value::String(s)) => parse_datetime(&s),
            _ => None,
        })
    }

    pub fn items<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<LineItem>, D::Error> {
        Ok(Option::<Vec<LineItem>>::deserialize(d)?.unwrap_or_default())
    }
}
