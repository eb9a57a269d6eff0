//! # Snapshot Gateway
//!
//! HTTP face of the producer. Serves the engine's four slices verbatim, a
//! health check, and the websocket push channel.
//!
//! | Route              | Body                  | Fault injection |
//! |--------------------|-----------------------|-----------------|
//! | `/stats/overview`  | `StatsDelta` (full)   | yes             |
//! | `/stats/timeline`  | `[EventRecord]`       | yes             |
//! | `/stats/anomalies` | `[AnomalyRecord]`     | yes             |
//! | `/stats/volume`    | `[VolumeBucket]`      | yes             |
//! | `/health`          | `"OK"`                | no              |
//! | `/ws`              | push frames           | no              |

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rand::Rng;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::models::{AnomalyRecord, EventRecord, PushMessage, StatsDelta, VolumeBucket};
use crate::producer::engine::PulseEngine;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Body of an injected request fault.
pub const SIMULATED_FAULT_BODY: &str = "Simulated Internal Server Error";

/// Shared state of every gateway route.
#[derive(Clone)]
pub struct GatewayState {
    engine: Arc<PulseEngine>,
    push_tx: broadcast::Sender<PushMessage>,
    request_fault_rate: f64,
    shutdown: CancellationToken,
}

impl GatewayState {
    /// `request_fault_rate` is clamped into [0, 1].
    pub fn new(
        engine: Arc<PulseEngine>,
        push_tx: broadcast::Sender<PushMessage>,
        request_fault_rate: f64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            push_tx,
            request_fault_rate: request_fault_rate.clamp(0.0, 1.0),
            shutdown,
        }
    }
}

/// Builds the gateway router.
pub fn router(state: GatewayState) -> Router {
    let stats = Router::new()
        .route("/stats/overview", get(overview_handler))
        .route("/stats/timeline", get(timeline_handler))
        .route("/stats/anomalies", get(anomalies_handler))
        .route("/stats/volume", get(volume_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), inject_faults));

    Router::new()
        .merge(stats)
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serves the gateway on `listener` until the state's shutdown token fires.
///
/// # Errors
/// Returns the I/O error that stopped the accept loop.
pub async fn serve(listener: TcpListener, state: GatewayState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Snapshot gateway listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Snapshot gateway shutting down.");
        })
        .await
}

async fn inject_faults(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let fault = rand::rng().random_bool(state.request_fault_rate);
    if fault {
        tracing::warn!(method = %request.method(), uri = %request.uri(), "Simulating 500 error");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": SIMULATED_FAULT_BODY })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn overview_handler(State(state): State<GatewayState>) -> Json<StatsDelta> {
    Json(state.engine.overview())
}

async fn timeline_handler(State(state): State<GatewayState>) -> Json<Vec<EventRecord>> {
    Json(state.engine.timeline())
}

async fn anomalies_handler(State(state): State<GatewayState>) -> Json<Vec<AnomalyRecord>> {
    Json(state.engine.anomalies())
}

async fn volume_handler(State(state): State<GatewayState>) -> Json<Vec<VolumeBucket>> {
    Json(state.engine.volume())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Forwards every broadcast frame to one subscriber. Inbound frames are
/// ignored apart from close; the channel is producer -> consumer only.
async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let mut push_rx = state.push_tx.subscribe();
    tracing::info!(client_id, "Push subscriber connected");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(client_id, error = %e, "Push subscriber read error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            frame = push_rx.recv() => {
                match frame {
                    Ok(msg) => match msg.encode() {
                        Ok(text) => {
                            if socket.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!(client_id, error = %e, "Failed to encode push frame"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(client_id, skipped, "Push subscriber lagging, frames skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!(client_id, "Push subscriber disconnected");
}
