//! HTTP surface: ingestion, retrieval and relay health.

mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tokio::sync::watch;

use crate::application::{ingest::IngestService, retrieve::RetrieveService};
use crate::domain::types::RelayState;

#[derive(Clone)]
pub struct HttpState {
    pub ingest: Arc<IngestService>,
    pub retrieve: Arc<RetrieveService>,
    pub relay_state: watch::Receiver<RelayState>,
    pub max_body_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/data", post(handlers::publish_data))
        .route("/retrieve", get(handlers::retrieve_data))
        .route("/health", get(handlers::relay_health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
