//! Predict server entry point

use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use predict_server::{
    AppState, create_router,
    config::Config,
    model::{load_model, read_run_id, LoadOptions},
    registry::{ModelUri, RegistryClient},
    service::PredictionService,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    init_tracing(&config);

    tracing::info!("Predict server starting...");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Startup failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "predict_server=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Registry: {}", config.registry_url);
    tracing::info!("Run id file: {}", config.run_id_file.display());

    // The model must be ready before the port is bound
    let run_id = read_run_id(&config.run_id_file)?;
    let uri = ModelUri::runs(run_id, config.artifact_name.as_str());

    let client = RegistryClient::new(&config.registry_url, config.registry_timeout())?;
    let options = LoadOptions {
        input_columns: config.input_columns.clone(),
        sessions: config.model_sessions,
    };
    let model = load_model(&client, &uri, &options)
        .await
        .with_context(|| format!("Failed to load model {}", uri))?;

    let service = PredictionService::new(model, config.predict_timeout());
    if let Some(info) = service.info() {
        let columns: Vec<String> = info
            .input_columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.dtype))
            .collect();
        tracing::info!(
            "Serving {} (loaded at {}), columns [{}]",
            info.model_uri,
            info.loaded_at,
            columns.join(", ")
        );
    }

    let app = create_router(AppState::new(service), config.max_body_bytes);

    let listener = config.bind_listener()
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    let addr = listener.local_addr().context("Listener has no local address")?;
    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received shutdown signal.");
}
