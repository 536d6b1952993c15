//! Model Module - loading and running the served model
//!
//! The registry artifact is turned into a [`LoadedModel`] once at startup and
//! never replaced afterwards.

pub mod inference;
pub mod loader;
pub mod mlmodel;
pub mod schema;
pub mod table;

use std::sync::Arc;
use chrono::{DateTime, Utc};

// Re-export common types
pub use inference::{CancelToken, OnnxPredictor, PredictError, Predictor};
pub use loader::{load_model, read_run_id, LoadError, LoadOptions};
pub use mlmodel::MlModel;
pub use schema::{ColumnSpec, ColumnType, InputSchema};
pub use table::{Table, TableError};

/// Model metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model_uri: String,
    pub run_id: String,
    pub artifact_file: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub input_columns: Vec<ColumnSpec>,
    pub loaded_at: DateTime<Utc>,
}

/// The served model: predictor plus the schema its input tables follow
#[derive(Clone)]
pub struct LoadedModel {
    pub predictor: Arc<dyn Predictor>,
    pub schema: InputSchema,
    pub info: ModelInfo,
}
