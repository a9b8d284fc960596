//! HTTP server implementation using Axum.

use crate::error::RunError;
use crate::response::RunOutput;
use crate::runner::FetchRequest;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// Request types
#[derive(Deserialize)]
struct RunRequest {
    #[serde(default)]
    github_repo: Option<String>,
    #[serde(default)]
    backend_path: Option<String>,
    #[serde(default = "default_input")]
    input_data: serde_json::Value,
}

fn default_input() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Build the router. Split out from [`run_server`] so tests can drive it directly.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run_script))
        .route("/run/", post(run_script))
        // Health check
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server on the given port until SIGINT or SIGTERM.
pub async fn run_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn run_script(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<RunOutput, RunError> {
    let Json(req) = body.map_err(|e| RunError::InvalidRequest(e.body_text()))?;
    let request = FetchRequest::new(
        req.github_repo.unwrap_or_default(),
        req.backend_path.unwrap_or_default(),
        req.input_data,
    )?;
    info!(
        "POST /run - repo: {} path: {}",
        request.repository_reference(),
        request.script_path()
    );

    // Detached so a client disconnect cannot cut the deadline or cleanup short.
    let runner = state.runner.clone();
    let stdout = tokio::spawn(async move { runner.run(&request).await })
        .await
        .map_err(|e| {
            error!("Run task failed: {}", e);
            RunError::ExecutionFailed("internal error while running script".to_string())
        })??;

    Ok(RunOutput::from_stdout(&stdout))
}
