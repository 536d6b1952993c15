//! Startup model loading
//!
//! run-id file → `runs:/` URI → registry artifact → ONNX predictor.
//! Every failure here is fatal; there are no retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::inference::{CancelToken, OnnxPredictor, PredictError, Predictor};
use super::mlmodel::{MlModel, MLMODEL_FILE_NAME};
use super::schema::{InputSchema, SchemaError};
use super::table::Table;
use super::{LoadedModel, ModelInfo};
use crate::registry::{ArtifactFile, ModelUri, RegistryClient, RegistryError};

/// Preferred ONNX file when the MLmodel has no `onnx` flavor
pub const ONNX_FILE_NAME: &str = "model.onnx";

/// Input example files, in lookup order
const INPUT_EXAMPLE_FILES: [&str; 2] = ["input_example.json", "serving_input_example.json"];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Cannot read run id file {path}: {source}")]
    RunIdFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Run id file {0} is empty")]
    EmptyRunId(PathBuf),
    #[error("Invalid run id '{0}'")]
    InvalidRunId(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Cannot determine model input columns: {0}")]
    SchemaUnavailable(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("Model cannot be served: {0}")]
    Model(#[from] PredictError),
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Explicit `name[:type],...` column list
    pub input_columns: Option<String>,
    /// ONNX session pool size
    pub sessions: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            input_columns: None,
            sessions: 1,
        }
    }
}

/// Files fetched for one model
#[derive(Debug)]
pub struct ModelArtifact {
    pub uri: ModelUri,
    pub onnx_path: String,
    pub onnx_bytes: Vec<u8>,
    pub mlmodel: MlModel,
    pub input_example: Option<Value>,
}

/// Read and trim the run id
pub fn read_run_id(path: &Path) -> Result<String, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::RunIdFile {
        path: path.to_path_buf(),
        source,
    })?;

    let run_id = raw.trim();
    if run_id.is_empty() {
        return Err(LoadError::EmptyRunId(path.to_path_buf()));
    }
    // Interpolated into URIs and query strings
    if !run_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(LoadError::InvalidRunId(run_id.to_string()));
    }

    Ok(run_id.to_string())
}

/// Locate and download the model files of `uri`
pub async fn fetch_model_artifact(client: &RegistryClient, uri: &ModelUri) -> Result<ModelArtifact, RegistryError> {
    let run = client.get_run(&uri.run_id).await?;
    if run.is_deleted() {
        return Err(RegistryError::RunDeleted(uri.run_id.clone()));
    }

    let files = client.list_artifacts(&uri.run_id, &uri.artifact_path).await?;
    if files.is_empty() {
        return Err(RegistryError::ArtifactNotFound {
            run_id: uri.run_id.clone(),
            path: uri.artifact_path.clone(),
        });
    }

    if !files.iter().any(|f| !f.is_dir && f.file_name() == MLMODEL_FILE_NAME) {
        return Err(RegistryError::NotAModel(uri.to_string()));
    }

    let mlmodel_path = uri.artifact_file(MLMODEL_FILE_NAME);
    let mlmodel_bytes = client.download_artifact(&uri.run_id, &mlmodel_path).await?;
    let mlmodel = MlModel::from_slice(&mlmodel_bytes).map_err(|e| RegistryError::InvalidMlModel {
        path: mlmodel_path.clone(),
        details: e.to_string(),
    })?;

    let onnx_path = match mlmodel.onnx_data() {
        Some(data) => uri.artifact_file(data),
        None => {
            let fallback = files
                .iter()
                .filter(|f| !f.is_dir && f.path.ends_with(".onnx"))
                .min_by_key(|f| f.file_name() != ONNX_FILE_NAME)
                .ok_or_else(|| RegistryError::NoOnnxModel(uri.to_string()))?;
            tracing::warn!("{} has no onnx flavor, using {}", mlmodel_path, fallback.path);
            fallback.path.clone()
        }
    };

    let onnx_bytes = client.download_artifact(&uri.run_id, &onnx_path).await?;
    let listed_size = files.iter().find(|f| f.path == onnx_path).and_then(|f| f.file_size);
    if let Some(expected) = listed_size {
        if expected != onnx_bytes.len() as u64 {
            return Err(RegistryError::SizeMismatch {
                path: onnx_path,
                expected,
                actual: onnx_bytes.len() as u64,
            });
        }
    }

    let input_example = fetch_input_example(client, &uri.run_id, &files).await;

    Ok(ModelArtifact {
        uri: uri.clone(),
        onnx_path,
        onnx_bytes,
        mlmodel,
        input_example,
    })
}

/// The example is optional, so problems with it only warn
async fn fetch_input_example(client: &RegistryClient, run_id: &str, files: &[ArtifactFile]) -> Option<Value> {
    let file = INPUT_EXAMPLE_FILES
        .iter()
        .find_map(|name| files.iter().find(|f| !f.is_dir && f.file_name() == *name))?;

    let bytes = match client.download_artifact(run_id, &file.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Input example {} not downloaded: {}", file.path, e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(example) => Some(example),
        Err(e) => {
            tracing::warn!("Input example {} is not valid JSON: {}", file.path, e);
            None
        }
    }
}

/// Column order and types, in order of precedence: explicit columns, the
/// MLmodel signature, the logged input example.
///
/// A signature that cannot describe columns (tensor-based) falls through to
/// the input example.
pub fn resolve_schema(
    input_columns: Option<&str>,
    signature: Option<&str>,
    input_example: Option<&Value>,
) -> Result<InputSchema, LoadError> {
    if let Some(spec) = input_columns {
        return Ok(InputSchema::parse(spec)?);
    }

    let mut signature_error = None;
    if let Some(inputs) = signature {
        match InputSchema::from_signature(inputs) {
            Ok(schema) => return Ok(schema),
            Err(e) => {
                tracing::warn!("Model signature not usable for column order: {}", e);
                signature_error = Some(e);
            }
        }
    }

    if let Some(example) = input_example {
        return Ok(InputSchema::from_input_example(example)?);
    }
    if let Some(e) = signature_error {
        return Err(e.into());
    }

    Err(LoadError::SchemaUnavailable(
        "no signature or input example logged with the model; set MODEL_INPUT_COLUMNS".to_string(),
    ))
}

/// Fetch, check and load the model behind `uri`
pub async fn load_model(client: &RegistryClient, uri: &ModelUri, options: &LoadOptions) -> Result<LoadedModel, LoadError> {
    tracing::info!("Loading model {} from {}", uri, client.base_url());

    let artifact = fetch_model_artifact(client, uri).await?;
    let schema = resolve_schema(
        options.input_columns.as_deref(),
        artifact.mlmodel.input_signature(),
        artifact.input_example.as_ref(),
    )?;

    let sha256 = hex::encode(Sha256::digest(&artifact.onnx_bytes));
    let size_bytes = artifact.onnx_bytes.len() as u64;

    let sessions = options.sessions;
    let warmup_schema = schema.clone();
    let bytes = artifact.onnx_bytes;
    let predictor = tokio::task::spawn_blocking(move || -> Result<OnnxPredictor, PredictError> {
        let predictor = OnnxPredictor::from_bytes(&bytes, sessions, warmup_schema.len())?;
        // One zero row checks the schema width against the model
        predictor.predict(&Table::zeros(&warmup_schema, 1), &CancelToken::new())?;
        Ok(predictor)
    })
    .await
    .map_err(|e| PredictError::Runtime(format!("Model loading task failed: {}", e)))??;

    let info = ModelInfo {
        model_uri: uri.to_string(),
        run_id: uri.run_id.clone(),
        artifact_file: artifact.onnx_path,
        size_bytes,
        sha256,
        input_columns: schema.columns().to_vec(),
        loaded_at: chrono::Utc::now(),
    };

    tracing::info!(
        "Model {} ready: {} ({} bytes, sha256 {}), input '{}' with columns [{}]",
        info.model_uri,
        info.artifact_file,
        info.size_bytes,
        info.sha256,
        predictor.input_name(),
        schema.names().join(", ")
    );

    Ok(LoadedModel {
        predictor: Arc::new(predictor),
        schema,
        info,
    })
}
