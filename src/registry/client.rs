//! MLflow REST client
//!
//! HTTP client for the tracking server: run lookup, artifact listing and
//! artifact download.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

use super::error::RegistryError;

/// Run metadata returned by `runs/get`
#[derive(Debug, Clone, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub artifact_uri: Option<String>,
    #[serde(default)]
    pub lifecycle_stage: Option<String>,
}

impl RunInfo {
    pub fn is_deleted(&self) -> bool {
        self.lifecycle_stage.as_deref() == Some("deleted")
    }
}

/// Entry of an artifact listing
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub file_size: Option<u64>,
}

impl ArtifactFile {
    /// Last path segment
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

// Response types

#[derive(Debug, Deserialize)]
struct GetRunResponse {
    run: RunEnvelope,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    files: Vec<ArtifactFile>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// int64 fields may come back as numbers or as strings.
fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

/// MLflow tracking server client
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl RegistryClient {
    /// Create new registry client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Client(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Look up a run by id
    pub async fn get_run(&self, run_id: &str) -> Result<RunInfo, RegistryError> {
        let url = format!("{}/api/2.0/mlflow/runs/get", self.base_url);
        let response = self.send(&url, &[("run_id", run_id)]).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_error_body(response).await;
            if status == 404 || body.error_code.as_deref() == Some("RESOURCE_DOES_NOT_EXIST") {
                return Err(RegistryError::RunNotFound(run_id.to_string()));
            }
            return Err(api_error(status, body));
        }

        let run: GetRunResponse = response.json().await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        tracing::debug!(
            "Run {} found (status: {}, stage: {})",
            run.run.info.run_id,
            run.run.info.status.as_deref().unwrap_or("unknown"),
            run.run.info.lifecycle_stage.as_deref().unwrap_or("unknown"),
        );

        Ok(run.run.info)
    }

    /// List the direct children of an artifact directory
    pub async fn list_artifacts(&self, run_id: &str, path: &str) -> Result<Vec<ArtifactFile>, RegistryError> {
        let url = format!("{}/api/2.0/mlflow/artifacts/list", self.base_url);
        let response = self.send(&url, &[("run_id", run_id), ("path", path)]).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_error_body(response).await;
            if status == 404 || body.error_code.as_deref() == Some("RESOURCE_DOES_NOT_EXIST") {
                return Err(RegistryError::ArtifactNotFound {
                    run_id: run_id.to_string(),
                    path: path.to_string(),
                });
            }
            return Err(api_error(status, body));
        }

        let listing: ListArtifactsResponse = response.json().await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        Ok(listing.files)
    }

    /// Download one artifact file
    pub async fn download_artifact(&self, run_id: &str, path: &str) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}/get-artifact", self.base_url);
        let response = self.send(&url, &[("path", path), ("run_uuid", run_id)]).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_error_body(response).await;
            if status == 404 {
                return Err(RegistryError::ArtifactNotFound {
                    run_id: run_id.to_string(),
                    path: path.to_string(),
                });
            }
            return Err(api_error(status, body));
        }

        let bytes = response.bytes().await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;

        tracing::debug!("Downloaded {} ({} bytes)", path, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn send(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, RegistryError> {
        self.http_client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable {
                url: self.base_url.clone(),
                details: e.to_string(),
            })
    }
}

async fn read_error_body(response: reqwest::Response) -> ApiErrorBody {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or_else(|_| ApiErrorBody {
        error_code: None,
        message: (!text.is_empty()).then_some(text),
    })
}

fn api_error(status: u16, body: ApiErrorBody) -> RegistryError {
    let message = match (body.error_code, body.message) {
        (Some(code), Some(msg)) => format!("{}: {}", code, msg),
        (Some(code), None) => code,
        (None, Some(msg)) => msg,
        (None, None) => "no details".to_string(),
    };
    RegistryError::Api { status, message }
}
