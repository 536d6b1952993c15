/// Errors returned by the registry client.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
    /// The tracking server could not be reached.
    #[error("Registry unreachable at {url}: {details}")]
    Unreachable { url: String, details: String },
    /// The run id is unknown to the registry.
    #[error("Run not found: {0}")]
    RunNotFound(String),
    /// The run exists but was deleted.
    #[error("Run {0} is deleted")]
    RunDeleted(String),
    /// Nothing is stored under the artifact path.
    #[error("Artifact '{path}' not found in run {run_id}")]
    ArtifactNotFound { run_id: String, path: String },
    /// The artifact directory has no MLmodel file.
    #[error("Artifact '{0}' is not an MLflow model (no MLmodel file)")]
    NotAModel(String),
    /// The MLmodel file is not valid YAML or has an unexpected layout.
    #[error("Invalid MLmodel file {path}: {details}")]
    InvalidMlModel { path: String, details: String },
    /// The model has no ONNX export.
    #[error("Model '{0}' has no ONNX file")]
    NoOnnxModel(String),
    /// A downloaded file does not match the size reported by the listing.
    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    /// Non-success response from the registry.
    #[error("Registry returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}
