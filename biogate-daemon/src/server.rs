//! HTTP surface: the scan WebSocket plus status and health routes.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use biogate_core::{SessionId, SubjectKey};
use futures_util::{future, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::rate_limit::UpgradeRateLimiter;
use crate::runner::SessionContext;
use crate::transport::{self, InboundFrame};

/// Shared state of the HTTP server.
#[derive(Clone, Debug)]
pub struct AppState {
    context: SessionContext,
    limiter: UpgradeRateLimiter,
    active_sessions: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(context: SessionContext, limiter: UpgradeRateLimiter) -> Self {
        Self {
            context,
            limiter,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of open scan connections.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DaemonStatus {
        let holder = self.context.arbiter.holder();
        DaemonStatus {
            provider: self.context.provider.name().to_string(),
            device_busy: holder.is_some(),
            holder,
            active_sessions: self.active_sessions(),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub provider: String,
    pub device_busy: bool,
    pub holder: Option<SessionId>,
    pub active_sessions: usize,
}

/// Counts an open connection for as long as it lives.
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/ws/scan/{subject_key}", get(scan_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn scan_handler(
    State(state): State<AppState>,
    Path(subject_key): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(limited) = state.limiter.check() {
        return limited.into_response();
    }
    let subject_key = SubjectKey::new(subject_key);
    ws.on_upgrade(move |socket| serve_socket(socket, state, subject_key))
}

async fn serve_socket(socket: WebSocket, state: AppState, subject_key: SubjectKey) {
    let _active = ActiveSession::enter(&state.active_sessions);

    let (sink, stream) = socket.split();
    let inbound = stream.map(inbound_frame);
    let outbound = sink.with(|text: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(text.into())))
    });

    if let Some(session) =
        transport::run_connection(state.context.clone(), subject_key, inbound, outbound).await
    {
        tracing::debug!(
            session = %session.id(),
            state = %session.state(),
            "Scan connection closed"
        );
    }
}

fn inbound_frame(frame: Result<Message, axum::Error>) -> InboundFrame {
    match frame {
        Ok(Message::Text(text)) => InboundFrame::Text(text.as_str().to_owned()),
        Ok(Message::Binary(bytes)) => InboundFrame::Binary(bytes.len()),
        Ok(Message::Ping(_) | Message::Pong(_)) => InboundFrame::Control,
        Ok(Message::Close(_)) => InboundFrame::Closed,
        Err(err) => {
            tracing::debug!(error = %err, "WebSocket read error");
            InboundFrame::Closed
        }
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<DaemonStatus> {
    Json(state.status())
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(err) => {
                tracing::error!(error = %err, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
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
}
