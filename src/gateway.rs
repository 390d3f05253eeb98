//! Listing store access.
//!
//! The store is a hosted Postgres table exposed through a PostgREST-style
//! HTTP API. Only simple equality filters, ordering and paging are used.

use itertools::Itertools;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, info};

use crate::error::DashboardError;
use crate::models::{DistinctRow, DistinctValues, FilterCriteria, ListingRecord};
use crate::state::Config;

/// The part of the criteria that is pushed down to the store.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct ListingScope {
    pub make: Option<String>,
    pub model: Option<String>,
}

impl From<&FilterCriteria> for ListingScope {
    fn from(criteria: &FilterCriteria) -> Self {
        Self {
            make: criteria.make.clone(),
            model: criteria.model.clone(),
        }
    }
}

impl ListingScope {
    fn params(&self) -> Vec<(&'static str, String)> {
        eq_params([("make", &self.make), ("model", &self.model)])
    }
}

fn eq_params<'a>(
    fields: impl IntoIterator<Item = (&'static str, &'a Option<String>)>,
) -> Vec<(&'static str, String)> {
    fields
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| (name, format!("eq.{}", v))))
        .collect()
}

/// HTTP client for the listing table.
#[derive(Debug, Clone)]
pub struct ListingGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl ListingGateway {
    pub fn new(config: &Config) -> Result<Self, DashboardError> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(&config.store_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.store_key))?,
        );

        let client = reqwest::Client::builder()
            .user_agent("carlot/1.0.0")
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/rest/v1/{}",
                config.store_url.trim_end_matches('/'),
                config.store_table
            ),
        })
    }

    /// Fetches at most `limit` listings starting at `offset`, newest first.
    pub async fn fetch_page(
        &self,
        offset: usize,
        limit: usize,
        scope: &ListingScope,
    ) -> Result<Vec<ListingRecord>, DashboardError> {
        let mut page: Vec<ListingRecord> = self.get(&page_params(offset, limit, scope)).await?;
        page.truncate(limit);
        debug!("Fetched {} listings at offset {}", page.len(), offset);
        Ok(page)
    }

    /// Pages through the store until a short page or `max_pages` is reached.
    pub async fn fetch_all(
        &self,
        scope: &ListingScope,
        page_size: usize,
        max_pages: usize,
    ) -> Result<Vec<ListingRecord>, DashboardError> {
        let gateway = self;
        let records = fetch_pages(page_size, max_pages, move |offset, limit| {
            gateway.fetch_page(offset, limit, scope)
        })
        .await?;
        info!("Loaded {} listings for scope {:?}", records.len(), scope);
        Ok(records)
    }

    /// Distinct make/model/trim/year values, narrowed by whichever of those
    /// fields are already set in `partial`.
    pub async fn fetch_distinct_values(
        &self,
        partial: &FilterCriteria,
    ) -> Result<DistinctValues, DashboardError> {
        let mut params = vec![("select", "make,model,trim,year".to_string())];
        params.extend(eq_params([
            ("make", &partial.make),
            ("model", &partial.model),
            ("trim", &partial.trim),
            ("year", &partial.year),
        ]));

        let rows: Vec<DistinctRow> = self.get(&params).await?;
        Ok(distinct_values(&rows))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        params: &[(&'static str, String)],
    ) -> Result<T, DashboardError> {
        let url = Url::parse_with_params(&self.endpoint, params)
            .map_err(|e| DashboardError::Config(format!("Invalid store URL: {}", e)))?;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        decode_response(status, &body)
    }
}

/// Query for one page of listings, newest first.
fn page_params(offset: usize, limit: usize, scope: &ListingScope) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("select", "*".to_string()),
        ("order", "date_listed.desc".to_string()),
        ("offset", offset.to_string()),
        ("limit", limit.to_string()),
    ];
    params.extend(scope.params());
    params
}

/// Calls `fetch(offset, limit)` for consecutive pages until one comes back
/// short or `max_pages` pages have been read. The first error aborts.
async fn fetch_pages<F, Fut>(
    page_size: usize,
    max_pages: usize,
    mut fetch: F,
) -> Result<Vec<ListingRecord>, DashboardError>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<ListingRecord>, DashboardError>>,
{
    let mut records = Vec::new();
    for page in 0..max_pages {
        let batch = fetch(page * page_size, page_size).await?;
        let done = batch.len() < page_size;
        records.extend(batch);
        if done {
            break;
        }
    }
    Ok(records)
}

fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, DashboardError> {
    if !status.is_success() {
        return Err(DashboardError::Store {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    Ok(serde_json::from_str(body)?)
}

fn distinct_values(rows: &[DistinctRow]) -> DistinctValues {
    fn column<'a>(values: impl Iterator<Item = Option<&'a String>>) -> Vec<String> {
        values.flatten().unique().sorted().cloned().collect()
    }

    DistinctValues {
        make: column(rows.iter().map(|r| r.make.as_ref())),
        model: column(rows.iter().map(|r| r.model.as_ref())),
        trim: column(rows.iter().map(|r| r.trim.as_ref())),
        year: column(rows.iter().map(|r| r.year.as_ref())),
    }
}
