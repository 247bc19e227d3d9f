//! Read-only HTTP endpoint for registry inspection.
//!
//! Routes:
//! - `GET /targets` returns the registry snapshot
//! - `GET /targets/{name}` returns one target's pool state
//! - `GET /health` reports whether every pool is running

use crate::error::{DbError, DbResult};
use crate::management::inspect::{
    HealthReport, HealthStatus, InspectionSnapshot, Inspector, TargetInspection,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ManagementServer {
    inspector: Arc<Inspector>,
    host: String,
    port: u16,
}

impl ManagementServer {
    pub fn new(inspector: Arc<Inspector>, host: impl Into<String>, port: u16) -> Self {
        Self {
            inspector,
            host: host.into(),
            port,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.inspector))
    }

    /// Bind, serve until SIGINT/SIGTERM, then close every pool.
    pub async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;
        info!(addr = %bind_addr, "Management endpoint ready");

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let notify = Arc::clone(&shutdown_notify);
        let shutdown_signal = async move {
            wait_for_signal().await;
            notify.notify_one();
        };

        let server = self.serve(listener, shutdown_signal);

        // Second signal or timeout after the first one drops the server.
        tokio::select! {
            result = server => result?,
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for connections to close (send signal again to force exit)..."
                );
                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing target pools");
        self.inspector.registry().close().await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> DbResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
        {
            Ok(()) => {
                info!("HTTP server stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "HTTP server error");
                Err(DbError::internal(format!("HTTP server error: {}", e)))
            }
        }
    }
}

pub fn router(inspector: Arc<Inspector>) -> Router {
    Router::new()
        .route("/targets", get(list_targets))
        .route("/targets/{name}", get(get_target))
        .route("/health", get(health))
        .with_state(inspector)
}

async fn list_targets(State(inspector): State<Arc<Inspector>>) -> Json<InspectionSnapshot> {
    Json(inspector.snapshot().await)
}

async fn get_target(
    State(inspector): State<Arc<Inspector>>,
    Path(name): Path<String>,
) -> Result<Json<TargetInspection>, DbError> {
    inspector.target(&name).await.map(Json)
}

async fn health(State(inspector): State<Arc<Inspector>>) -> (StatusCode, Json<HealthReport>) {
    let report = inspector.health().await;
    let status = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

pub fn status_for(err: &DbError) -> StatusCode {
    match err {
        DbError::TargetNotFound { .. } => StatusCode::NOT_FOUND,
        DbError::InvalidArgument { .. } | DbError::Configuration { .. } => StatusCode::BAD_REQUEST,
        DbError::UnsupportedOperation { .. } => StatusCode::NOT_IMPLEMENTED,
        DbError::TimeoutExpired { .. } => StatusCode::GATEWAY_TIMEOUT,
        DbError::IllegalState { .. } => StatusCode::CONFLICT,
        DbError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "suggestion": self.suggestion(),
        });
        (status_for(&self), Json(body)).into_response()
    }
}

async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
