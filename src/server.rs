//! ==============================================================================
//! server.rs - viewer-facing web server
//! ==============================================================================
//!
//! routes:
//!     GET /ws          websocket, one per dashboard viewer
//!     GET /api/status  json snapshot for scripts and health checks
//!
//! per viewer:
//!
//! ```text
//! hub queue ──► send task ──► socket ──► browser
//! browser ──► socket ──► recv task ──► CommandRelay
//! ```
//!
//! lifecycle:
//!     when either task ends the other is cancelled and the viewer is
//!     deregistered. the send task also stops as soon as the hub releases
//!     the viewer (queue overflow), dropping anything still queued.
//!
//! ==============================================================================

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{Json, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::BridgeError;
use crate::hub::{HubHandle, HubStatus, ViewerSubscription};
use crate::relay::CommandRelay;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub relay: CommandRelay,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/status", get(status_handler))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// serve until `shutdown` flips to true
pub async fn run_server(
    addr: &str,
    state: AppState,
    cors_origins: &[String],
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(state, cors_origins);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Viewer endpoint live at ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, state))
}

/// json snapshot of the live state
async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<HubStatus>, StatusCode> {
    state
        .hub
        .status()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn serve_viewer(socket: WebSocket, state: AppState) {
    let subscription = match state.hub.connect().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!("Rejecting viewer: {}", e);
            return;
        }
    };
    let ViewerSubscription {
        id,
        mut messages,
        mut released,
    } = subscription;
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut released => break,
                payload = messages.recv() => {
                    let Some(payload) = payload else { break };
                    if sink.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let relay = state.relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => relay.handle(id, &text).await,
                Message::Binary(_) => {
                    relay
                        .reject(
                            id,
                            BridgeError::InvalidCommand("binary frames are not supported".into()),
                        )
                        .await
                }
                Message::Close(_) => break,
                // ping/pong are answered by the websocket layer
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.disconnect(id).await;
    tracing::debug!("Viewer {} socket closed", id);
}
