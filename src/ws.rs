use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::api::{Query, SharedState};
use crate::auth;
use crate::db::DbHandle;
use crate::models::{AlertSeverity, ClimateAlert, Notification, NotificationPriority, NotificationType};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// A serialized event on its way to connected sockets. `user_id: None`
/// reaches everyone.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub user_id: Option<i64>,
    pub payload: String,
}

pub type WsSender = broadcast::Sender<Outbound>;

/// Whether `out` should be relayed to the socket of `user_id`.
pub(crate) fn addressed_to(out: &Outbound, user_id: i64) -> bool {
    out.user_id.is_none_or(|id| id == user_id)
}

// ── WebSocket message types ──────────────────────────────────────────

/// Server-to-client events. Serialized flat with a `type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    ConnectionEstablished {
        message: String,
    },
    Notification {
        id: i64,
        title: String,
        content: String,
        notification_type: NotificationType,
        priority: NotificationPriority,
        icon: String,
        action_url: String,
        created_at: String,
    },
    AchievementUnlocked {
        achievement_id: i64,
        name: String,
        description: String,
        badge_icon: String,
        points: i64,
    },
    ChallengeUpdate {
        challenge_id: i64,
        challenge_name: String,
        progress: f64,
        status: String,
    },
    ClimateAlert {
        alert_id: i64,
        title: String,
        description: String,
        severity: AlertSeverity,
        location: String,
    },
    Pong {
        timestamp: serde_json::Value,
    },
    Error {
        message: String,
    },
}

impl WsEvent {
    pub fn connected() -> Self {
        WsEvent::ConnectionEstablished {
            message: "Connected to EcoSphere notifications".to_string(),
        }
    }

    pub fn from_notification(n: &Notification) -> Self {
        WsEvent::Notification {
            id: n.id,
            title: n.title.clone(),
            content: n.content.clone(),
            notification_type: n.notification_type,
            priority: n.priority,
            icon: n.icon.clone(),
            action_url: n.action_url.clone(),
            created_at: n.created_at.clone(),
        }
    }

    pub fn from_alert(alert: &ClimateAlert) -> Self {
        WsEvent::ClimateAlert {
            alert_id: alert.id,
            title: alert.title.clone(),
            description: alert.description.clone(),
            severity: alert.severity,
            location: alert.location.clone(),
        }
    }
}

/// Messages a client may send. Anything else that parses as JSON is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping {
        #[serde(default)]
        timestamp: serde_json::Value,
    },
    MarkNotificationRead {
        notification_id: i64,
    },
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// `GET /ws/notifications?token=...`. The token is checked before upgrading.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = params.token.unwrap_or_default();
    let user = match auth::authenticate(&state, &token).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    tracing::info!(user_id = user.id, "notification socket connected");
    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
}

async fn handle_socket(socket: WebSocket, state: SharedState, user_id: i64) {
    let (mut sender, receiver) = socket.split();
    let rx = state.ws_tx.subscribe();
    if send_event(&mut sender, &WsEvent::connected()).await.is_err() {
        return;
    }
    run_socket_loop(sender, receiver, rx, state.db.clone(), user_id).await;
    tracing::info!(user_id, "notification socket closed");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &WsEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize websocket event");
            Ok(())
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards broadcast events addressed to `user_id` (or to everyone),
/// answers client messages and sends periodic pings. If no Pong arrives
/// within [`PONG_TIMEOUT`] the connection is considered dead.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<Outbound>,
    db: DbHandle,
    user_id: i64,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(user_id, "pong timeout, dropping socket");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Broadcast forwarding ────────────────────────────────
            result = rx.recv() => {
                match result {
                    Ok(out) => {
                        if !addressed_to(&out, user_id) {
                            continue;
                        }
                        if sender.send(Message::Text(out.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id, skipped, "socket lagged behind broadcast");
                        continue;
                    }
                }
            }

            // ── Client messages ─────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&db, user_id, text.as_str()).await {
                            if send_event(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Handle one text frame from the client, returning an optional reply.
async fn handle_client_text(db: &DbHandle, user_id: i64, text: &str) -> Option<WsEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return Some(WsEvent::Error {
                message: "Invalid JSON format".to_string(),
            });
        }
    };
    match serde_json::from_value::<ClientMessage>(value) {
        Ok(ClientMessage::Ping { timestamp }) => Some(WsEvent::Pong { timestamp }),
        Ok(ClientMessage::MarkNotificationRead { notification_id }) => {
            let result = db
                .call(move |db| db.mark_notification_read(user_id, notification_id))
                .await;
            if let Err(e) = result {
                tracing::warn!(user_id, notification_id, error = %e, "failed to mark notification read");
            }
            None
        }
        Err(_) => None,
    }
}

// ── Broadcast helpers ────────────────────────────────────────────────

fn publish(tx: &WsSender, user_id: Option<i64>, event: &WsEvent) {
    match serde_json::to_string(event) {
        Ok(payload) => {
            // No connected sockets is not an error.
            let _ = tx.send(Outbound { user_id, payload });
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize websocket event");
        }
    }
}

/// Deliver an event to every socket of one user.
pub fn send_to_user(tx: &WsSender, user_id: i64, event: &WsEvent) {
    publish(tx, Some(user_id), event);
}

/// Deliver an event to every connected socket.
pub fn broadcast_all(tx: &WsSender, event: &WsEvent) {
    publish(tx, None, event);
}

// ── Tests ────────────────────────────────────────────────────────────
