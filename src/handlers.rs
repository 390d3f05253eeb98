use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tera::Context;
use tracing::{error, info};

use crate::charts::{scatter_points, time_series};
use crate::filters::{apply_filters, sort_listings, unique_values, ListingField, SortColumn, SortOrder};
use crate::kpi::{calculate_kpis, compare_periods};
use crate::models::{FilterCriteria, ListingRecord, ListingView};
use crate::state::{AppData, AppState};

/// Query parameters for the listings table.
#[derive(Debug, Deserialize)]
pub struct ListingsQuery {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    #[serde(default)]
    pub sort: Option<SortColumn>,
    #[serde(default)]
    pub order: Option<SortOrder>,
}

/// Already-selected values that narrow the cascading dropdowns.
#[derive(Debug, Deserialize)]
pub struct CascadeQuery {
    #[serde(default, deserialize_with = "empty_string_as_none_str")]
    pub make: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none_str")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none_str")]
    pub trim: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none_str")]
    pub year: Option<String>,
}

fn empty_string_as_none_str<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => Ok(Some(s)),
    }
}

fn render_template(
    tera: &tera::Tera,
    template: &str,
    context: &Context,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    tera.render(template, context).map(Html).map_err(|e| {
        error!("Template render error for '{}': {}", template, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Render error")
    })
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        s.to_string()
    }
}

/// Criteria with the relative period resolved at `now`, and the matching records.
fn filtered(data: &AppData, now: DateTime<Utc>) -> (FilterCriteria, Vec<ListingRecord>) {
    let criteria = data.criteria.resolved(now);
    let records = apply_filters(&data.records, &criteria);
    (criteria, records)
}

#[derive(Debug, Serialize)]
struct TableRow {
    title: String,
    price: Option<f64>,
    mileage: Option<u64>,
    date_listed: Option<String>,
    source: String,
    url: Option<String>,
    image: Option<String>,
}

impl From<&ListingRecord> for TableRow {
    fn from(record: &ListingRecord) -> Self {
        let title = format!("{} {} {}", record.year, record.make, record.model);
        Self {
            title: truncate_chars(&title, 40),
            price: record.price,
            mileage: record.mileage,
            date_listed: record.date_listed.clone(),
            source: record.source.clone(),
            url: record.url.clone(),
            image: record.image(),
        }
    }
}

/// GET / - Dashboard with KPI cards and the newest listings.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    let now = Utc::now();
    let (criteria, mut records) = filtered(&data_guard, now);
    let comparison = compare_periods(&data_guard.records, &data_guard.criteria, now);
    let last_error = data_guard.last_error.clone();
    drop(data_guard);

    let summary = comparison
        .as_ref()
        .map(|c| c.current.clone())
        .unwrap_or_else(|| calculate_kpis(&records, now));

    sort_listings(&mut records, SortColumn::DateListed, SortOrder::Desc);
    let rows: Vec<TableRow> = records.iter().take(10).map(TableRow::from).collect();

    let mut context = Context::new();
    context.insert("summary", &summary);
    context.insert("changes", &comparison.map(|c| c.changes));
    context.insert("criteria", &criteria);
    context.insert("rows", &rows);
    context.insert("total_filtered", &records.len());
    context.insert("last_error", &last_error);

    render_template(&state.tera, "dashboard.html", &context)
}

/// GET /api/criteria - Current filter criteria.
pub async fn get_criteria(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    Json(data_guard.criteria.clone())
}

/// PUT /api/criteria - Replace filter criteria, refetching when make/model change.
pub async fn put_criteria(
    State(state): State<Arc<AppState>>,
    Json(criteria): Json<FilterCriteria>,
) -> impl IntoResponse {
    let refetch = state.data.write().await.set_criteria(criteria.clone());
    if refetch {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let outcome = state.refresh().await;
            info!("Refetch after criteria change: {:?}", outcome);
        });
    }
    Json(serde_json::json!({
        "criteria": criteria,
        "refetching": refetch
    }))
}

/// POST /api/criteria/reset - Restore the configured defaults.
pub async fn reset_criteria(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let defaults = state.config.defaults.criteria.clone();
    put_criteria(State(state), Json(defaults)).await
}

/// GET /api/listings - Filtered, sorted, paginated listings.
pub async fn api_listings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListingsQuery>,
) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    let (_, mut records) = filtered(&data_guard, Utc::now());
    drop(data_guard);

    sort_listings(
        &mut records,
        query.sort.unwrap_or_default(),
        query.order.unwrap_or_default(),
    );

    let total_listings = records.len();
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(25).clamp(1, 100);
    let total_pages = total_listings.div_ceil(per_page);

    // Adjust page if it exceeds total pages (unless total is 0)
    let page = if total_pages > 0 && page > total_pages {
        total_pages
    } else {
        page
    };

    let start_index = (page - 1).saturating_mul(per_page);
    let end_index = start_index.saturating_add(per_page).min(total_listings);

    let listings: Vec<ListingView> = if start_index >= total_listings {
        Vec::new()
    } else {
        records[start_index..end_index].iter().map(ListingView::from).collect()
    };

    Json(serde_json::json!({
        "listings": listings,
        "page": page,
        "per_page": per_page,
        "total_pages": total_pages,
        "total_listings": total_listings
    }))
}

/// GET /api/kpis - Current period KPIs against the preceding period.
pub async fn api_kpis(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    let now = Utc::now();
    let comparison = compare_periods(&data_guard.records, &data_guard.criteria, now);
    let summary = match &comparison {
        Some(c) => c.current.clone(),
        None => calculate_kpis(&filtered(&data_guard, now).1, now),
    };
    drop(data_guard);

    Json(serde_json::json!({
        "summary": summary,
        "comparison": comparison
    }))
}

/// GET /api/charts/timeseries - Daily average price line.
pub async fn api_timeseries(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    let (_, records) = filtered(&data_guard, Utc::now());
    drop(data_guard);

    match time_series(&records) {
        Ok(points) => Json(serde_json::json!({ "points": points })),
        Err(e) => {
            error!("Time series aggregation error: {}", e);
            Json(serde_json::json!({ "points": [] }))
        }
    }
}

/// GET /api/charts/scatter - Price against mileage.
pub async fn api_scatter(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    let (_, records) = filtered(&data_guard, Utc::now());
    drop(data_guard);

    Json(scatter_points(&records))
}

/// GET /api/options - Dropdown values from the loaded listings.
pub async fn api_options(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    let values: BTreeMap<String, _> = ListingField::DROPDOWNS
        .iter()
        .map(|field| {
            let key = serde_json::to_value(field)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            (key, unique_values(&data_guard.records, *field))
        })
        .collect();
    drop(data_guard);

    Json(serde_json::json!({
        "values": values,
        "color_options": state.config.defaults.color_options,
        "transmission_options": state.config.defaults.transmission_options
    }))
}

/// GET /api/options/cascade - Distinct make/model/trim/year from the store.
pub async fn api_cascade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CascadeQuery>,
) -> impl IntoResponse {
    let partial = FilterCriteria {
        make: query.make,
        model: query.model,
        trim: query.trim,
        year: query.year,
        ..FilterCriteria::default()
    };
    match state.gateway.fetch_distinct_values(&partial).await {
        Ok(values) => Json(values).into_response(),
        Err(e) => {
            error!("Distinct values fetch failed: {}", e);
            (StatusCode::BAD_GATEWAY, "Listing store unavailable").into_response()
        }
    }
}

/// POST /api/refresh - Reload listings from the store.
pub async fn api_refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outcome = state.refresh().await;
    Json(serde_json::json!({ "outcome": outcome }))
}

/// GET /api/status - Load state of the listing set.
pub async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_guard = state.data.read().await;
    Json(serde_json::json!({
        "records": data_guard.records.len(),
        "loaded_at": data_guard.loaded_at,
        "last_error": data_guard.last_error
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod truncate_chars_tests {
        use super::*;

        #[test]
        fn test_short_string_unchanged() {
            assert_eq!(truncate_chars("2019 Honda Civic", 40), "2019 Honda Civic");
        }

        #[test]
        fn test_long_string_truncated() {
            assert_eq!(truncate_chars("2021 Mercedes-Benz", 13), "2021 Mercedes...");
        }
    }

    mod table_row_tests {
        use super::*;

        #[test]
        fn test_row_uses_first_photo() {
            let record = ListingRecord {
                source: "cars".into(),
                year: "2016".into(),
                make: "Mazda".into(),
                model: "CX-5".into(),
                photos: Some("['https://img/a.jpg', 'https://img/b.jpg']".into()),
                ..Default::default()
            };
            let row = TableRow::from(&record);
            assert_eq!(row.title, "2016 Mazda CX-5");
            assert_eq!(row.image.as_deref(), Some("https://img/a.jpg"));
        }
    }

    mod filtered_tests {
        use super::*;

        #[test]
        fn test_uses_session_criteria() {
            let mut data = AppData::new(FilterCriteria::default());
            data.records = vec![
                ListingRecord {
                    make: "Honda".into(),
                    price: Some(1.0),
                    ..Default::default()
                },
                ListingRecord {
                    make: "Ford".into(),
                    price: None,
                    ..Default::default()
                },
            ];
            let (criteria, records) = filtered(&data, Utc::now());
            assert!(criteria.only_with_pricing);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].make, "Honda");
        }

        #[test]
        fn test_window_matches_comparison_at_same_instant() {
            use crate::models::Period;
            use chrono::TimeZone;

            let mut data = AppData::new(FilterCriteria {
                period: Some(Period::Day),
                period_count: 7,
                ..Default::default()
            });
            data.records = ["30/3/24", "25/3/24", "1/1/24"]
                .into_iter()
                .map(|date| ListingRecord {
                    make: "Honda".into(),
                    price: Some(10_000.0),
                    date_listed: Some(date.into()),
                    ..Default::default()
                })
                .collect();

            let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
            let (criteria, records) = filtered(&data, now);
            let window = criteria.window().unwrap();
            assert_eq!(window.end, now);
            assert_eq!(records.len(), 2);

            let comparison = compare_periods(&data.records, &data.criteria, now).unwrap();
            assert_eq!(comparison.current.total_listings, records.len());

            let later = Utc.with_ymd_and_hms(2024, 4, 30, 12, 0, 0).unwrap();
            assert!(filtered(&data, later).1.is_empty());
        }
    }

    #[test]
    fn test_cascade_query_drops_empty_strings() {
        let query: CascadeQuery =
            serde_json::from_str(r#"{"make":"Honda","model":"","trim":null}"#).unwrap();
        assert_eq!(query.make.as_deref(), Some("Honda"));
        assert_eq!(query.model, None);
        assert_eq!(query.trim, None);
        assert_eq!(query.year, None);
    }
}
