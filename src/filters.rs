//! Filter engine: record predicates, derived time windows, dropdown values
//! and table ordering.
//!
//! Everything here is pure. Records are borrowed and filtered copies are
//! returned; derived display data is produced by projection.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

use crate::dates::{parse_listing_date, resolve_period, TimeWindow};
use crate::models::{FilterCriteria, ListingRecord, ListingView, Period};

impl FilterCriteria {
    /// Returns a copy whose `start_date`/`end_date` reflect the relative
    /// period as of `now`. Custom or absent periods keep the explicit dates.
    pub fn resolved(&self, now: DateTime<Utc>) -> Self {
        let mut resolved = self.clone();
        if let Some(period) = self.period {
            if period != Period::Custom {
                if let Some(window) = resolve_period(period, self.period_count, now) {
                    resolved.start_date = Some(window.start);
                    resolved.end_date = Some(window.end);
                }
            }
        }
        resolved
    }

    /// The explicit window, when both bounds are set.
    pub fn window(&self) -> Option<TimeWindow> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => Some(TimeWindow::new(start, end)),
            _ => None,
        }
    }

    /// A copy bounded by `window`, marked custom so it is never re-resolved.
    pub fn with_window(&self, window: TimeWindow) -> Self {
        Self {
            start_date: Some(window.start),
            end_date: Some(window.end),
            period: Some(Period::Custom),
            ..self.clone()
        }
    }
}

/// Returns the records that satisfy every predicate in `criteria`.
///
/// The time window is read from `start_date`/`end_date` as given; call
/// [`FilterCriteria::resolved`] first to apply a relative period.
pub fn apply_filters(records: &[ListingRecord], criteria: &FilterCriteria) -> Vec<ListingRecord> {
    let window = criteria.window();
    records
        .iter()
        .filter(|record| matches(record, criteria, window.as_ref()))
        .cloned()
        .collect()
}

fn matches(record: &ListingRecord, criteria: &FilterCriteria, window: Option<&TimeWindow>) -> bool {
    if criteria.only_with_pricing && record.price.is_none() {
        return false;
    }
    if !exact(Some(&record.make), &criteria.make) || !exact(Some(&record.model), &criteria.model) {
        return false;
    }
    if !exact(record.trim.as_ref(), &criteria.trim) {
        return false;
    }
    if let Some(max) = criteria.mileage {
        if !record.mileage.is_some_and(|m| m <= max) {
            return false;
        }
    }
    if !contains_ignore_case(&record.exterior_color, &criteria.exterior_color)
        || !contains_ignore_case(&record.interior_color, &criteria.interior_color)
        || !contains_ignore_case(&record.transmission, &criteria.transmission)
    {
        return false;
    }
    if !exact(record.drivetrain.as_ref(), &criteria.drivetrain)
        || !exact(record.listing_type.as_ref(), &criteria.listing_type)
        || !exact(Some(&record.year), &criteria.year)
    {
        return false;
    }

    // Bad or missing dates never exclude a record.
    match (window, record.date_listed.as_deref().and_then(parse_listing_date)) {
        (Some(window), Some(listed)) => window.contains(&listed),
        _ => true,
    }
}

fn exact(value: Option<&String>, wanted: &Option<String>) -> bool {
    match wanted {
        Some(wanted) => value.is_some_and(|v| v == wanted),
        None => true,
    }
}

fn contains_ignore_case(value: &Option<String>, wanted: &Option<String>) -> bool {
    match wanted {
        Some(wanted) => value
            .as_ref()
            .is_some_and(|v| v.to_lowercase().contains(&wanted.to_lowercase())),
        None => true,
    }
}

/// Parses the serialized photo list. Accepts a JSON array or a
/// single-quoted list; anything else is logged and treated as empty.
pub fn parse_photos(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Ok(photos) = serde_json::from_str::<Vec<String>>(raw) {
        return photos;
    }
    match serde_json::from_str::<Vec<String>>(&raw.replace('\'', "\"")) {
        Ok(photos) => photos,
        Err(e) => {
            warn!("Malformed photos payload '{}': {}", raw, e);
            Vec::new()
        }
    }
}

impl ListingRecord {
    /// First photo URL, if the photo list parses and is non-empty.
    pub fn image(&self) -> Option<String> {
        self.photos
            .as_deref()
            .and_then(|raw| parse_photos(raw).into_iter().next())
    }
}

impl From<&ListingRecord> for ListingView {
    fn from(record: &ListingRecord) -> Self {
        Self {
            image: record.image(),
            record: record.clone(),
        }
    }
}

/// Fields offered as dropdown options.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingField {
    Source,
    Year,
    Make,
    Model,
    Trim,
    ExteriorColor,
    InteriorColor,
    Transmission,
    Drivetrain,
    ListingType,
    Price,
    Mileage,
}

impl ListingField {
    pub const DROPDOWNS: [ListingField; 9] = [
        ListingField::Year,
        ListingField::Make,
        ListingField::Model,
        ListingField::Trim,
        ListingField::ExteriorColor,
        ListingField::InteriorColor,
        ListingField::Transmission,
        ListingField::Drivetrain,
        ListingField::ListingType,
    ];

    fn text<'a>(&self, record: &'a ListingRecord) -> Option<&'a str> {
        match self {
            ListingField::Source => Some(&record.source),
            ListingField::Year => Some(&record.year),
            ListingField::Make => Some(&record.make),
            ListingField::Model => Some(&record.model),
            ListingField::Trim => record.trim.as_deref(),
            ListingField::ExteriorColor => record.exterior_color.as_deref(),
            ListingField::InteriorColor => record.interior_color.as_deref(),
            ListingField::Transmission => record.transmission.as_deref(),
            ListingField::Drivetrain => record.drivetrain.as_deref(),
            ListingField::ListingType => record.listing_type.as_deref(),
            ListingField::Price | ListingField::Mileage => None,
        }
    }

    fn number(&self, record: &ListingRecord) -> Option<f64> {
        match self {
            ListingField::Price => record.price,
            ListingField::Mileage => record.mileage.map(|m| m as f64),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, ListingField::Price | ListingField::Mileage)
    }
}

/// Sorted distinct values of one field.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum UniqueValues {
    /// Ascending, case-sensitive.
    Text(Vec<String>),
    /// Descending.
    Numeric(Vec<f64>),
}

/// Distinct non-null values of `field` across `records`.
pub fn unique_values(records: &[ListingRecord], field: ListingField) -> UniqueValues {
    if field.is_numeric() {
        let mut values: Vec<f64> = records.iter().filter_map(|r| field.number(r)).collect();
        values.sort_by(|a, b| b.total_cmp(a));
        values.dedup();
        UniqueValues::Numeric(values)
    } else {
        UniqueValues::Text(
            records
                .iter()
                .filter_map(|r| field.text(r))
                .unique()
                .sorted()
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Sortable data-table columns.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    #[default]
    DateListed,
    Price,
    Mileage,
    Year,
    Make,
    Model,
    Source,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Stable sort on one column. Missing values go last in either order.
pub fn sort_listings(records: &mut [ListingRecord], column: SortColumn, order: SortOrder) {
    match column {
        // Parse each date once rather than per comparison.
        SortColumn::DateListed => records.sort_by_cached_key(|r| date_sort_key(r, order)),
        SortColumn::Price => {
            records.sort_by(|a, b| nulls_last(a.price, b.price, order, |x, y| x.total_cmp(y)))
        }
        SortColumn::Mileage => {
            records.sort_by(|a, b| nulls_last(a.mileage, b.mileage, order, |x, y| x.cmp(y)))
        }
        SortColumn::Year => records.sort_by(|a, b| directed(a.year.cmp(&b.year), order)),
        SortColumn::Make => records.sort_by(|a, b| directed(a.make.cmp(&b.make), order)),
        SortColumn::Model => records.sort_by(|a, b| directed(a.model.cmp(&b.model), order)),
        SortColumn::Source => records.sort_by(|a, b| directed(a.source.cmp(&b.source), order)),
    }
}

/// Listing timestamp, negated for descending order, with missing or
/// unparseable dates sorting last.
fn date_sort_key(record: &ListingRecord, order: SortOrder) -> (bool, Option<i64>) {
    let timestamp = record
        .date_listed
        .as_deref()
        .and_then(parse_listing_date)
        .map(|listed| match order {
            SortOrder::Asc => listed.timestamp(),
            SortOrder::Desc => -listed.timestamp(),
        });
    (timestamp.is_none(), timestamp)
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn nulls_last<T>(
    a: Option<T>,
    b: Option<T>,
    order: SortOrder,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => directed(cmp(&a, &b), order),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
