use chrono::{DateTime, Utc};
use serde::Serialize;
use std::env;
use tera::Tera;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::DashboardError;
use crate::gateway::{ListingGateway, ListingScope};
use crate::models::{FilterCriteria, ListingRecord, Period};

/// Initial filter state and the fixed dropdown option lists.
#[derive(Debug, Clone, Serialize)]
pub struct FilterDefaults {
    pub criteria: FilterCriteria,
    pub color_options: Vec<String>,
    pub transmission_options: Vec<String>,
}

impl Default for FilterDefaults {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            criteria: FilterCriteria {
                period: Some(Period::Month),
                period_count: 3,
                ..FilterCriteria::default()
            },
            color_options: owned(&[
                "Black", "White", "Silver", "Gray", "Blue", "Red", "Green", "Brown", "Beige",
                "Gold", "Orange", "Yellow",
            ]),
            transmission_options: owned(&["Automatic", "Manual"]),
        }
    }
}

/// Application configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind_address: String,
    /// Cron expression for the listing refresh schedule.
    pub refresh_cron: String,
    /// Base URL of the hosted listing store.
    pub store_url: String,
    /// API key for the listing store.
    pub store_key: String,
    /// Table holding the listings.
    pub store_table: String,
    /// Listings requested per page.
    pub page_size: usize,
    /// Upper bound on pages read in one refresh.
    pub max_pages: usize,
    /// Criteria applied at startup and on reset, plus dropdown options.
    pub defaults: FilterDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8201".into(),
            refresh_cron: "0 0 * * * *".into(),
            store_url: String::new(),
            store_key: String::new(),
            store_table: "listings".into(),
            page_size: 1000,
            max_pages: 50,
            defaults: FilterDefaults::default(),
        }
    }
}

impl Config {
    /// Creates Config from environment variables with defaults.
    ///
    /// `STORE_URL` and `STORE_KEY` are required.
    pub fn from_env() -> Result<Self, DashboardError> {
        let defaults = Self::default();
        let required = |name: &str| {
            env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DashboardError::Config(format!("{} is not set", name)))
        };
        let number = |name: &str, fallback: usize| match env::var(name) {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| DashboardError::Config(format!("{} must be a positive integer", name))),
            Err(_) => Ok(fallback),
        };

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            refresh_cron: env::var("REFRESH_CRON").unwrap_or(defaults.refresh_cron),
            store_url: required("STORE_URL")?,
            store_key: required("STORE_KEY")?,
            store_table: env::var("STORE_TABLE").unwrap_or(defaults.store_table),
            page_size: number("PAGE_SIZE", defaults.page_size)?,
            max_pages: number("MAX_PAGES", defaults.max_pages)?,
            defaults: defaults.defaults,
        })
    }
}

/// Shared application state passed to all request handlers.
#[derive(Debug)]
pub struct AppState {
    /// Template engine for rendering HTML pages.
    pub tera: Tera,
    pub config: Config,
    pub gateway: ListingGateway,
    /// Session data protected by RwLock.
    pub data: RwLock<AppData>,
}

impl AppState {
    pub fn new(tera: Tera, config: Config, gateway: ListingGateway) -> Self {
        let data = AppData::new(config.defaults.criteria.clone());
        Self {
            tera,
            config,
            gateway,
            data: RwLock::new(data),
        }
    }

    /// Loads listings for the current scope and applies them unless a newer
    /// fetch or criteria change has superseded this one.
    pub async fn refresh(&self) -> FetchOutcome {
        let ticket = self.data.write().await.begin_fetch();
        let result = self
            .gateway
            .fetch_all(&ticket.scope, self.config.page_size, self.config.max_pages)
            .await;
        self.data.write().await.complete_fetch(ticket, result)
    }
}

/// Identifies one in-flight fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    generation: u64,
    pub scope: ListingScope,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Applied,
    /// A newer fetch was issued or the scope changed; result dropped.
    Stale,
    /// Fetch failed; previous records kept.
    Failed,
}

#[derive(Debug)]
pub struct AppData {
    pub records: Vec<ListingRecord>,
    pub criteria: FilterCriteria,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    generation: u64,
}

impl AppData {
    pub fn new(criteria: FilterCriteria) -> Self {
        Self {
            records: Vec::new(),
            criteria,
            loaded_at: None,
            last_error: None,
            generation: 0,
        }
    }

    /// Replaces the criteria. Returns true when the store scope changed and
    /// the record set needs refetching.
    pub fn set_criteria(&mut self, criteria: FilterCriteria) -> bool {
        let changed = ListingScope::from(&criteria) != ListingScope::from(&self.criteria);
        self.criteria = criteria;
        if changed {
            self.generation += 1;
        }
        changed
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.generation += 1;
        FetchTicket {
            generation: self.generation,
            scope: ListingScope::from(&self.criteria),
        }
    }

    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<ListingRecord>, DashboardError>,
    ) -> FetchOutcome {
        if ticket.generation != self.generation || ticket.scope != ListingScope::from(&self.criteria)
        {
            info!("Discarding stale fetch for scope {:?}", ticket.scope);
            return FetchOutcome::Stale;
        }
        match result {
            Ok(records) => {
                self.records = records;
                self.loaded_at = Some(Utc::now());
                self.last_error = None;
                FetchOutcome::Applied
            }
            Err(e) => {
                warn!("Listing fetch failed, keeping {} records: {}", self.records.len(), e);
                self.last_error = Some(e.to_string());
                FetchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(make: &str) -> ListingRecord {
        ListingRecord {
            source: "cars".into(),
            year: "2020".into(),
            make: make.into(),
            model: "X".into(),
            price: Some(1.0),
            ..Default::default()
        }
    }

    fn store_error() -> DashboardError {
        DashboardError::Store {
            status: 503,
            body: "unavailable".into(),
        }
    }

    mod fetch_tests {
        use super::*;

        #[test]
        fn test_applies_current_fetch() {
            let mut data = AppData::new(FilterCriteria::default());
            let ticket = data.begin_fetch();
            assert_eq!(
                data.complete_fetch(ticket, Ok(vec![record("Honda")])),
                FetchOutcome::Applied
            );
            assert_eq!(data.records.len(), 1);
            assert!(data.loaded_at.is_some());
        }

        #[test]
        fn test_older_ticket_is_stale() {
            let mut data = AppData::new(FilterCriteria::default());
            let first = data.begin_fetch();
            let second = data.begin_fetch();
            assert_eq!(
                data.complete_fetch(second, Ok(vec![record("Honda")])),
                FetchOutcome::Applied
            );
            assert_eq!(
                data.complete_fetch(first, Ok(vec![record("Ford"), record("Ford")])),
                FetchOutcome::Stale
            );
            assert_eq!(data.records[0].make, "Honda");
        }

        #[test]
        fn test_scope_change_invalidates_ticket() {
            let mut data = AppData::new(FilterCriteria::default());
            let ticket = data.begin_fetch();
            let changed = data.set_criteria(FilterCriteria {
                make: Some("Ford".into()),
                ..Default::default()
            });
            assert!(changed);
            assert_eq!(
                data.complete_fetch(ticket, Ok(vec![record("Honda")])),
                FetchOutcome::Stale
            );
            assert!(data.records.is_empty());
        }

        #[test]
        fn test_local_criteria_change_keeps_ticket() {
            let mut data = AppData::new(FilterCriteria::default());
            let ticket = data.begin_fetch();
            let changed = data.set_criteria(FilterCriteria {
                mileage: Some(1000),
                ..Default::default()
            });
            assert!(!changed);
            assert_eq!(
                data.complete_fetch(ticket, Ok(vec![record("Honda")])),
                FetchOutcome::Applied
            );
        }

        #[test]
        fn test_failure_keeps_previous_records() {
            let mut data = AppData::new(FilterCriteria::default());
            let ticket = data.begin_fetch();
            data.complete_fetch(ticket, Ok(vec![record("Honda")]));

            let ticket = data.begin_fetch();
            assert_eq!(
                data.complete_fetch(ticket, Err(store_error())),
                FetchOutcome::Failed
            );
            assert_eq!(data.records.len(), 1);
            assert!(data.last_error.as_deref().unwrap().contains("503"));
        }
    }

    #[test]
    fn test_default_filters_use_relative_period() {
        let defaults = FilterDefaults::default();
        assert_eq!(defaults.criteria.period, Some(Period::Month));
        assert!(defaults.criteria.only_with_pricing);
        assert!(defaults.transmission_options.contains(&"Manual".to_string()));
    }

    #[tokio::test]
    async fn test_app_state_starts_from_configured_defaults() {
        let config = Config {
            store_url: "https://db.example.com".into(),
            store_key: "key".into(),
            ..Config::default()
        };
        let gateway = ListingGateway::new(&config).unwrap();
        let state = AppState::new(Tera::default(), config.clone(), gateway);
        let data = state.data.read().await;
        assert_eq!(data.criteria, config.defaults.criteria);
        assert!(data.records.is_empty());
    }
}
