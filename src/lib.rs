//! Prediction server for a registry-hosted regression model.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     PREDICT SERVER                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  startup:  run-id file ─► runs:/<id>/<artifact> ─► MLflow │
//! │                                   │                      │
//! │                                   ▼                      │
//! │                        ONNX session pool                 │
//! │                                   ▲                      │
//! │  request:  POST /predict ─► table ─┘─► {"predictions"}   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod model;
pub mod registry;
pub mod service;

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    routing::post,
};
use tower_http::{
    compression::CompressionLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

pub use error::{AppError, AppResult};
use service::PredictionService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictionService>,
}

impl AppState {
    pub fn new(service: PredictionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Create the router: a single prediction route
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(handlers::predict::predict))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                id = %Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .with_state(state)
}
