//! HTTP and WebSocket endpoint the browser overlay connects to.

use super::{OverlayEvent, OverlayHub};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Page added to OBS as a browser source, with `?guildId=<id>`.
pub const CLIENT_PATH: &str = "/client";
pub const SOCKET_PATH: &str = "/ws";

const CLIENT_PAGE: &str = include_str!("../../assets/client.html");

/// Frames an overlay client may send.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    JoinRoom(String),
    LeaveRoom(String),
    Ping,
}

/// Rooms one socket listens to.
#[derive(Debug, Default)]
struct Session {
    rooms: HashSet<String>,
}

impl Session {
    /// Applies a client frame and returns the reply to send back, if any.
    fn handle(&mut self, frame: ClientFrame) -> Option<String> {
        match frame {
            ClientFrame::JoinRoom(room) => {
                debug!("Overlay socket joined {}", room);
                self.rooms.insert(room);
                None
            }
            ClientFrame::LeaveRoom(room) => {
                self.rooms.remove(&room);
                None
            }
            ClientFrame::Ping => Some(frame_text("ping", &json!("pong"))),
        }
    }

    fn wants(&self, event: &OverlayEvent) -> bool {
        self.rooms.contains(&event.topic)
    }
}

pub fn router(hub: OverlayHub) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(CLIENT_PATH, get(client_page))
        .route(SOCKET_PATH, get(ws_upgrade))
        .with_state(hub)
}

pub async fn serve(port: u16, hub: OverlayHub, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Overlay server listening on {}", addr);

    axum::serve(listener, router(hub))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Overlay server stopped");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn client_page() -> Html<&'static str> {
    Html(CLIENT_PAGE)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(hub): State<OverlayHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: OverlayHub) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    // Subscribe before reading so nothing published after the join is missed.
    let mut events = hub.subscribe();
    let mut session = Session::default();
    debug!("Overlay socket connected");

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("Overlay socket read error: {}", e);
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => session.handle(frame),
                    Err(e) => {
                        debug!("Ignoring overlay frame: {}", e);
                        None
                    }
                };
                if let Some(reply) = reply {
                    if send_text(&mut ws_tx, reply).await.is_err() {
                        break;
                    }
                }
            }
            published = events.recv() => {
                match published {
                    Ok(event) => {
                        if !session.wants(&event) {
                            continue;
                        }
                        if send_text(&mut ws_tx, frame_text(&event.event, &event.payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Overlay socket lagged, skipped {} event(s)", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    debug!("Overlay socket disconnected");
}

async fn send_text(ws_tx: &mut SplitSink<WebSocket, Message>, text: String) -> Result<(), axum::Error> {
    ws_tx.send(Message::Text(text.into())).await
}

fn frame_text(event: &str, data: &Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}
