//! Server Implementation
//!
//! Router assembly, background workers and the HTTP listener.

use axum::{Router, middleware};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api::middleware::{capture_failures, log_request};
use crate::auth::require_auth;
use crate::core::state::InitError;
use crate::core::{BackgroundTasks, Config, ServerState, TaskKind};
use crate::ledger::verifier::LedgerVerifier;
use crate::observability::alerts::AlertDispatcher;
use crate::stock::outbox::{LogSink, OutboxWorker, ProcurementSink, WebhookSink};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}

/// Build the application router
///
/// Layer order, outermost first: request id, trace, access log, CORS,
/// failure capture, deadline, authentication.
pub fn build_app(state: ServerState) -> Router {
    let timeout = state.config.request_timeout();

    crate::api::router()
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn_with_state(state.clone(), capture_failures))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(log_request))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// HTTP Server
pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config)?,
        };

        let mut tasks = BackgroundTasks::new();
        start_background_tasks(&state, &mut tasks)?;
        tasks.log_summary();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        tracing::info!(%addr, environment = %self.config.environment, "Back-office server listening");

        let result = axum::serve(listener, build_app(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(ServerError::Serve);

        tasks.shutdown().await;
        result
    }
}

/// Outbox delivery, alert forwarding and periodic chain verification
pub fn start_background_tasks(
    state: &ServerState,
    tasks: &mut BackgroundTasks,
) -> Result<(), ServerError> {
    let config = &state.config;
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;

    let sink: Box<dyn ProcurementSink> = match &config.procurement_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "LOW_STOCK events go to the procurement webhook");
            Box::new(WebhookSink::new(client, url.clone()))
        }
        None => Box::new(LogSink),
    };
    let outbox = OutboxWorker::new(
        state.storage.clone(),
        sink,
        Duration::from_millis(config.outbox_poll_ms),
        tasks.shutdown_token(),
    )
    .with_alerts(state.alerts.clone());
    tasks.spawn("outbox_worker", TaskKind::Worker, outbox.run());

    let dispatcher = AlertDispatcher::new(
        &state.alerts,
        config.alert_webhook_url.clone(),
        tasks.shutdown_token(),
    );
    tasks.spawn("alert_dispatcher", TaskKind::Listener, dispatcher.run());

    let verifier = LedgerVerifier::new(
        state.stock.ledger().clone(),
        state.alerts.clone(),
        Duration::from_secs(config.ledger_verify_interval_secs),
        tasks.shutdown_token(),
    );
    tasks.spawn("ledger_verifier", TaskKind::Periodic, verifier.run());

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
