//! Data models shared by every part of the dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One observed car listing as stored in the listing table.
///
/// Dates stay in the store's `day/month/yy` text form; use
/// [`crate::dates::parse_listing_date`] to read them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ListingRecord {
    /// Site the listing was scraped from.
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Model year, kept as an opaque token. The store may send a number.
    #[serde(deserialize_with = "string_or_number")]
    pub year: String,
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub trim: Option<String>,
    #[serde(default, alias = "exteriorColor")]
    pub exterior_color: Option<String>,
    #[serde(default, alias = "interiorColor")]
    pub interior_color: Option<String>,
    #[serde(default)]
    pub transmission: Option<String>,
    #[serde(default)]
    pub drivetrain: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub mileage: Option<u64>,
    /// e.g. "auction" or "dealer".
    #[serde(default, alias = "listingType")]
    pub listing_type: Option<String>,
    #[serde(default, alias = "dateListed")]
    pub date_listed: Option<String>,
    #[serde(default, alias = "dateSold")]
    pub date_sold: Option<String>,
    /// Serialized list of image URLs. Frequently malformed.
    #[serde(default)]
    pub photos: Option<String>,
}

/// A listing together with its derived display image.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ListingView {
    #[serde(flatten)]
    pub record: ListingRecord,
    pub image: Option<String>,
}

/// Relative time window unit.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    /// Explicit `start_date`/`end_date` are authoritative.
    Custom,
}

/// User-selected filter state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FilterCriteria {
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub exterior_color: Option<String>,
    pub interior_color: Option<String>,
    pub transmission: Option<String>,
    pub drivetrain: Option<String>,
    pub listing_type: Option<String>,
    pub year: Option<String>,
    /// Maximum mileage, `None` is unbounded.
    pub mileage: Option<u64>,
    pub only_with_pricing: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub period: Option<Period>,
    pub period_count: u32,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            make: None,
            model: None,
            trim: None,
            exterior_color: None,
            interior_color: None,
            transmission: None,
            drivetrain: None,
            listing_type: None,
            year: None,
            mileage: None,
            only_with_pricing: true,
            start_date: None,
            end_date: None,
            period: None,
            period_count: 1,
        }
    }
}

/// Aggregate statistics over the valid-price subset of a record set.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct KpiSummary {
    pub total_listings: usize,
    /// `None` when there are no priced listings.
    pub average_price: Option<f64>,
    /// `None` when there are no priced listings.
    pub average_days_on_market: Option<f64>,
    /// OLS trend over the date-ordered price series, in percent.
    pub percentage_change: f64,
}

/// Per-field deltas between two summaries.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct KpiChanges {
    pub total_listings: f64,
    pub average_price: Option<f64>,
    pub average_days_on_market: Option<f64>,
    /// Point difference, not a relative change.
    pub percentage_change: f64,
}

/// Current-period summary compared with the preceding period.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KpiComparison {
    pub current: KpiSummary,
    pub previous: KpiSummary,
    pub changes: KpiChanges,
}

/// Distinct values for the cascading dropdowns.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct DistinctValues {
    pub make: Vec<String>,
    pub model: Vec<String>,
    pub trim: Vec<String>,
    pub year: Vec<String>,
}

/// Row shape returned by the distinct-values query.
#[derive(Debug, Deserialize, Clone)]
pub struct DistinctRow {
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub year: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Num(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<StringOrNumber> = Option::deserialize(deserializer)?;
    Ok(opt.map(String::from))
}
