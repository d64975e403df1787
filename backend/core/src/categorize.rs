//! Vendor categorization.
//!
//! A category is picked by case-insensitive substring match of the vendor
//! name against an ordered keyword table. The first matching category wins.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SlipError, SlipResult};
use crate::row::format_items;
use crate::types::Receipt;

/// Category assigned when no keyword matches.
pub const FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
}

/// Ordered vendor keyword table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        let rule = |category: &str, keywords: &[&str]| CategoryRule {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        };
        Self {
            rules: vec![
                rule("Groceries", &["walmart", "kroger", "whole foods", "safeway", "costco"]),
                rule("Restaurants", &["mcdonalds", "starbucks", "subway", "taco bell", "chipotle"]),
                rule("Gas/Fuel", &["shell", "exxon", "chevron", "bp", "76"]),
                rule("Shopping", &["amazon", "target", "best buy", "home depot"]),
            ],
        }
    }
}

impl CategoryTable {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|r| CategoryRule {
                    category: r.category,
                    keywords: r.keywords.into_iter().map(|k| k.to_lowercase()).collect(),
                })
                .collect(),
        }
    }

    /// Load a table from a JSON file of `[{"category": .., "keywords": [..]}]`.
    pub async fn load(path: &Path) -> SlipResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            SlipError::Config(format!("cannot read category table {}: {e}", path.display()))
        })?;
        let rules: Vec<CategoryRule> = serde_json::from_str(&raw).map_err(|e| {
            SlipError::Config(format!("invalid category table {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), categories = rules.len(), "Loaded category table");
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn categorize(&self, vendor_name: &str) -> &str {
        let vendor = vendor_name.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| vendor.contains(k.as_str())))
            .map(|rule| rule.category.as_str())
            .unwrap_or(FALLBACK_CATEGORY)
    }
}

impl Receipt {
    /// Fill in derived fields before the receipt is persisted.
    ///
    /// Only unset fields are written, so a redelivered job produces the same
    /// receipt as the first delivery.
    pub fn enrich(&mut self, table: &CategoryTable) {
        if self.primary_category.is_none() {
            self.primary_category = Some(table.categorize(&self.vendor_name).to_string());
        }
        if self.item_summary.is_none() {
            let summary = format_items(&self.items);
            if !summary.is_empty() {
                self.item_summary = Some(summary);
            }
        }
    }
}
