mod charts;
mod dates;
mod error;
mod filters;
mod gateway;
mod handlers;
mod kpi;
mod models;
mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tera::Tera;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::gateway::ListingGateway;
use crate::state::{AppState, Config, FetchOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("carlot=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let tera = Tera::new("templates/**/*.html")?;
    let gateway = ListingGateway::new(&config)?;
    let state = Arc::new(AppState::new(tera, config.clone(), gateway));

    info!("Fetching initial listings...");
    if state.refresh().await == FetchOutcome::Failed {
        error!("Initial fetch failed; serving an empty listing set until the next refresh");
    }

    let scheduler = JobScheduler::new().await?;
    let job_state = Arc::clone(&state);
    scheduler
        .add(Job::new_async(config.refresh_cron.as_str(), move |_uuid, _lock| {
            let state = Arc::clone(&job_state);
            Box::pin(async move {
                let outcome = state.refresh().await;
                info!("Scheduled refresh finished: {:?}", outcome);
            })
        })?)
        .await?;
    scheduler.start().await?;

    let app = Router::new()
        .route("/", get(handlers::index))
        .route(
            "/api/criteria",
            get(handlers::get_criteria).put(handlers::put_criteria),
        )
        .route("/api/criteria/reset", post(handlers::reset_criteria))
        .route("/api/listings", get(handlers::api_listings))
        .route("/api/kpis", get(handlers::api_kpis))
        .route("/api/charts/timeseries", get(handlers::api_timeseries))
        .route("/api/charts/scatter", get(handlers::api_scatter))
        .route("/api/options", get(handlers::api_options))
        .route("/api/options/cascade", get(handlers::api_cascade))
        .route("/api/refresh", post(handlers::api_refresh))
        .route("/api/status", get(handlers::api_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
