//! Health check
//!
//! | Path | Method | Auth |
//! |------|--------|------|
//! | /api/health | GET | none |

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::core::ServerState;

static STARTED: OnceLock<Instant> = OnceLock::new();

pub fn router() -> Router<ServerState> {
    STARTED.get_or_init(Instant::now);
    Router::new().route("/api/health", get(health))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    uptime_seconds: u64,
    database: &'static str,
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let database = match state.storage.begin_read() {
        Ok(_) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "Health check could not open a read transaction");
            "error"
        }
    };
    Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        uptime_seconds: STARTED.get().map(|s| s.elapsed().as_secs()).unwrap_or(0),
        database,
    })
}
