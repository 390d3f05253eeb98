//! KPI aggregation over listing sets and period-over-period comparison.

use chrono::{DateTime, Utc};

use crate::dates::parse_listing_date;
use crate::filters::apply_filters;
use crate::models::{FilterCriteria, KpiChanges, KpiComparison, KpiSummary, ListingRecord};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Summarises the listings with a strictly positive price.
pub fn calculate_kpis(records: &[ListingRecord], now: DateTime<Utc>) -> KpiSummary {
    let mut priced: Vec<(&ListingRecord, f64)> = records
        .iter()
        .filter_map(|r| r.price.filter(|p| *p > 0.0).map(|p| (r, p)))
        .collect();

    let total_listings = priced.len();
    if total_listings == 0 {
        return KpiSummary::default();
    }
    let count = total_listings as f64;

    let average_price = priced.iter().map(|(_, p)| p).sum::<f64>() / count;

    // Unparseable dates add nothing but still count toward the mean.
    let days_on_market: f64 = priced
        .iter()
        .filter_map(|(r, _)| r.date_listed.as_deref().and_then(parse_listing_date))
        .map(|listed| (now - listed).num_milliseconds() as f64 / MILLIS_PER_DAY)
        .sum();

    priced.sort_by_cached_key(|(r, _)| listing_order_key(r));
    let prices: Vec<f64> = priced.iter().map(|(_, p)| *p).collect();

    KpiSummary {
        total_listings,
        average_price: Some(average_price),
        average_days_on_market: Some(days_on_market / count),
        percentage_change: trend_percentage(&prices),
    }
}

/// Parsed dates ascending, then unparseable dates by their raw text.
fn listing_order_key(record: &ListingRecord) -> (bool, Option<DateTime<Utc>>, Option<String>) {
    let parsed = record.date_listed.as_deref().and_then(parse_listing_date);
    (parsed.is_none(), parsed, record.date_listed.clone())
}

/// Relative change between the first and last points of an OLS line fitted
/// to `prices` over their index.
fn trend_percentage(prices: &[f64]) -> f64 {
    let n = prices.len();
    if n <= 1 {
        return 0.0;
    }
    let count = n as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, price) in prices.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += price;
        sum_xy += x * price;
        sum_xx += x * x;
    }
    let slope = (count * sum_xy - sum_x * sum_y) / (count * sum_xx - sum_x * sum_x);
    let intercept = (sum_y - slope * sum_x) / count;

    let start_price = intercept;
    let end_price = slope * (count - 1.0) + intercept;
    if start_price == 0.0 {
        return 0.0;
    }
    (end_price - start_price) / start_price * 100.0
}

fn relative_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

/// Compares two summaries. Undefined averages on either side give an
/// undefined change.
pub fn calculate_kpi_comparison(current: &KpiSummary, previous: &KpiSummary) -> KpiComparison {
    let optional = |cur: Option<f64>, prev: Option<f64>| match (cur, prev) {
        (Some(cur), Some(prev)) => Some(relative_change(cur, prev)),
        _ => None,
    };
    let changes = KpiChanges {
        total_listings: relative_change(
            current.total_listings as f64,
            previous.total_listings as f64,
        ),
        average_price: optional(current.average_price, previous.average_price),
        average_days_on_market: optional(
            current.average_days_on_market,
            previous.average_days_on_market,
        ),
        percentage_change: current.percentage_change - previous.percentage_change,
    };
    KpiComparison {
        current: current.clone(),
        previous: previous.clone(),
        changes,
    }
}

/// Summarises the criteria's window against the window of equal length
/// immediately before it. Returns `None` when no window is set or the
/// preceding window falls outside the representable date range.
pub fn compare_periods(
    records: &[ListingRecord],
    criteria: &FilterCriteria,
    now: DateTime<Utc>,
) -> Option<KpiComparison> {
    let resolved = criteria.resolved(now);
    let window = resolved.window()?;

    let current = calculate_kpis(&apply_filters(records, &resolved), now);
    let previous_criteria = resolved.with_window(window.previous()?);
    let previous = calculate_kpis(&apply_filters(records, &previous_criteria), now);

    Some(calculate_kpi_comparison(&current, &previous))
}
