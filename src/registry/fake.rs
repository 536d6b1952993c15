//! In-process fake of the MLflow endpoints used by the client (tests only).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

#[derive(Default, Clone)]
pub struct FakeRegistry {
    runs: HashSet<String>,
    deleted: HashSet<String>,
    files: HashMap<(String, String), Vec<u8>>,
}

pub struct FakeRegistryHandle {
    pub url: String,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for FakeRegistryHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Params = Query<HashMap<String, String>>;

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run(mut self, run_id: &str) -> Self {
        self.runs.insert(run_id.to_string());
        self
    }

    pub fn with_deleted_run(mut self, run_id: &str) -> Self {
        self.runs.insert(run_id.to_string());
        self.deleted.insert(run_id.to_string());
        self
    }

    pub fn with_file(mut self, run_id: &str, path: &str, bytes: Vec<u8>) -> Self {
        self.files.insert((run_id.to_string(), path.to_string()), bytes);
        self
    }

    /// Serve on an ephemeral loopback port
    pub async fn spawn(self) -> FakeRegistryHandle {
        let app = Router::new()
            .route("/api/2.0/mlflow/runs/get", get(get_run))
            .route("/api/2.0/mlflow/artifacts/list", get(list_artifacts))
            .route("/get-artifact", get(get_artifact))
            .with_state(Arc::new(self));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        FakeRegistryHandle {
            url: format!("http://{}", addr),
            task,
        }
    }
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error_code": "RESOURCE_DOES_NOT_EXIST", "message": message })),
    )
        .into_response()
}

async fn get_run(State(registry): State<Arc<FakeRegistry>>, Query(params): Params) -> Response {
    let run_id = params.get("run_id").cloned().unwrap_or_default();
    if !registry.runs.contains(&run_id) {
        return not_found(format!("Run '{}' not found", run_id));
    }

    let stage = if registry.deleted.contains(&run_id) { "deleted" } else { "active" };
    Json(json!({
        "run": {
            "info": {
                "run_id": run_id,
                "run_uuid": run_id,
                "experiment_id": "1",
                "status": "FINISHED",
                "artifact_uri": format!("mlflow-artifacts:/1/{}/artifacts", run_id),
                "lifecycle_stage": stage,
            },
            "data": {}
        }
    }))
    .into_response()
}

async fn list_artifacts(State(registry): State<Arc<FakeRegistry>>, Query(params): Params) -> Response {
    let run_id = params.get("run_id").cloned().unwrap_or_default();
    if !registry.runs.contains(&run_id) {
        return not_found(format!("Run '{}' not found", run_id));
    }

    let prefix = format!("{}/", params.get("path").cloned().unwrap_or_default());
    let mut files: Vec<_> = registry
        .files
        .iter()
        .filter(|((run, path), _)| {
            run == &run_id && path.starts_with(&prefix) && !path[prefix.len()..].contains('/')
        })
        .map(|((_, path), bytes)| json!({ "path": path, "is_dir": false, "file_size": bytes.len() }))
        .collect();
    files.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));

    let root_uri = format!("mlflow-artifacts:/1/{}/artifacts", run_id);
    if files.is_empty() {
        Json(json!({ "root_uri": root_uri })).into_response()
    } else {
        Json(json!({ "root_uri": root_uri, "files": files })).into_response()
    }
}

async fn get_artifact(State(registry): State<Arc<FakeRegistry>>, Query(params): Params) -> Response {
    let key = (
        params.get("run_uuid").cloned().unwrap_or_default(),
        params.get("path").cloned().unwrap_or_default(),
    );
    match registry.files.get(&key) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}
