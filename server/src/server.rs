//! HTTP/WebSocket surface
//!
//! Three WebSocket endpoints — broadcaster, viewers, job events — plus a
//! health probe. Handlers only pump frames between sockets and the hub/bus;
//! all policy lives behind those components.

use crate::events::EventBus;
use crate::storage::database::DatabaseManager;
use crate::stream::hub::{StreamEvent, StreamHub};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<StreamHub>,
    pub events: Arc<EventBus>,
    pub database: Arc<DatabaseManager>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stream/broadcast", get(broadcast_upgrade))
        .route("/stream/watch", get(watch_upgrade))
        .route("/jobs/events", get(job_events_upgrade))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    match state.database.health_check().await {
        Ok(info) => Json(info).into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn broadcast_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_broadcaster(socket, addr, state))
}

async fn handle_broadcaster(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let (conn, outbound) = match state.hub.connect_broadcaster(addr).await {
        Ok(accepted) => accepted,
        Err(frame) => {
            reject(socket, &frame).await;
            return;
        }
    };

    let (sink, mut inbound) = socket.split();
    let writer = tokio::spawn(pump_frames(outbound, sink));

    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Binary(data)) => conn.handle_audio(data).await,
            Ok(Message::Text(text)) => {
                if conn.handle_text(&text).await {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    conn.close().await;
    // The hub released the outbound sender on finalize, so the writer drains
    let _ = writer.await;
    debug!("Broadcaster connection from {} closed", addr);
}

async fn watch_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: AppState) {
    let (viewer_id, mut outbound) = match state.hub.connect_viewer().await {
        Ok(accepted) => accepted,
        Err(frame) => {
            reject(socket, &frame).await;
            return;
        }
    };

    let (mut sink, mut inbound) = socket.split();
    loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(event) => {
                    if send_json(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                // Dropped by the hub (overflow) or hub shutdown
                None => break,
            },
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Viewers are read-only; inbound frames are ignored
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.disconnect_viewer(viewer_id);
    let _ = sink.close().await;
    debug!("Viewer {} disconnected", viewer_id);
}

async fn job_events_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_job_events(socket, state))
}

async fn handle_job_events(socket: WebSocket, state: AppState) {
    let mut events = state.events.subscribe();
    let (mut sink, mut inbound) = socket.split();

    match state.events.initial_state().await {
        Ok(initial) => {
            if send_json(&mut sink, &initial).await.is_err() {
                return;
            }
        }
        Err(e) => {
            error!("Could not build initial job state: {}", e);
            let _ = sink.close().await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_json(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Best-effort delivery: a slow subscriber skips frames
                    warn!("Job-events subscriber lagged, skipped {} frames", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.close().await;
}

/// Drain an outbound queue onto a socket as JSON text frames
async fn pump_frames(
    mut outbound: mpsc::Receiver<StreamEvent>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(event) = outbound.recv().await {
        if send_json(&mut sink, &event).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn send_json<T: Serialize>(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &T,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(e) => {
            error!("Could not serialize outbound frame: {}", e);
            Ok(())
        }
    }
}

/// Send one error frame, then close
async fn reject(mut socket: WebSocket, frame: &StreamEvent) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = socket.send(Message::Text(text)).await;
    }
    let _ = socket.close().await;
}
