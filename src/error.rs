//! Error types for the carlot dashboard.
//!
//! Only failures that stop an operation live here. Malformed dates and photo
//! payloads inside otherwise valid records are not errors: they are logged as
//! warnings and degrade to `None` where they are read.

use thiserror::Error;

/// Custom error type for dashboard operations.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Error parsing JSON returned by the listing store.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport-level failure talking to the listing store.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The store key cannot be sent as a header value.
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// The store answered with a non-success status.
    #[error("Listing store returned {status}: {body}")]
    Store { status: u16, body: String },

    /// Chart aggregation failed inside polars.
    #[error("Aggregation error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// Dashboard page could not be rendered.
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    /// Missing or invalid environment configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
