use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use qr_gate_common::config::Config;
use qr_gate_common::verdict::MatchStatus;
use qr_gate_scanner::{LogFeedback, QrDecoder, ScanSession, StatusUpdate};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    session: Mutex<ScanSession>,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatusBody {
    status: MatchStatus,
    target: String,
    decoded: Option<String>,
    tick: u64,
    updated_at_ms: i64,
    text: String,
    border: Option<&'static str>,
}

impl From<StatusUpdate> for StatusBody {
    fn from(update: StatusUpdate) -> Self {
        Self {
            text: update.text(),
            border: update.border(),
            status: update.status,
            target: update.target,
            decoded: update.decoded,
            tick: update.tick,
            updated_at_ms: update.updated_at_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetTarget {
    target: String,
}

#[derive(Debug, Deserialize)]
struct SetInterval {
    interval_ms: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// GET /status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    let session = state.session.lock().await;
    Json(session.current().into())
}

/// PUT /target {"target": "M"}; an empty string clears the selection.
async fn put_target(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetTarget>,
) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    match session.set_target(body.target) {
        Ok(()) => Json(StatusBody::from(session.current())).into_response(),
        Err(e) => {
            error!(error = %e, "failed to apply target");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// DELETE /target
async fn delete_target(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    match session.set_target(String::new()) {
        Ok(()) => Json(StatusBody::from(session.current())).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// PUT /interval {"interval_ms": 250}
async fn put_interval(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetInterval>,
) -> impl IntoResponse {
    let mut session = state.session.lock().await;
    match session.set_interval(Duration::from_millis(body.interval_ms)) {
        Ok(()) => {
            info!(interval_ms = body.interval_ms, "sampling interval updated");
            Json(StatusBody::from(session.current())).into_response()
        }
        Err(e) => {
            warn!(error = %e, interval_ms = body.interval_ms, "rejected interval");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/target", put(put_target).delete(delete_target))
        .route("/interval", put(put_interval))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let source = match qr_gate_producer::open_camera(&config.camera).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to acquire camera");
            std::process::exit(1);
        }
    };

    let mut session = match ScanSession::new(
        source,
        Arc::new(QrDecoder::new()),
        Arc::new(LogFeedback),
        config.sampler.interval(),
    ) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create scan session");
            std::process::exit(1);
        }
    };
    if let Err(e) = session.set_target(config.session.target.clone()) {
        error!(error = %e, "failed to apply initial target");
        std::process::exit(1);
    }

    let state = Arc::new(AppState {
        session: Mutex::new(session),
    });
    let app = router(Arc::clone(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr = %addr, "qr-gate API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "API server failed");
    }

    state.session.lock().await.shutdown();
    info!("qr-gate API server stopped");
}
