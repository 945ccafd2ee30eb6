//! WebSocket endpoint.
//!
//! A connection authenticates by session token, is auto-subscribed to its
//! own `user:{id}` topic, and may subscribe to the shared topics with
//! plain-text commands. Frames to the client are JSON `{event, data}`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use chomp_notify::{SocketId, Topic};

use crate::api::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    /// Session token; browsers cannot set headers on WebSocket upgrades.
    pub token: String,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .store()
        .user_for_session(&params.token)
        .await
        .map_err(chomp_core::ChompError::from)?
        .ok_or_else(|| {
            chomp_core::ChompError::Unauthenticated("invalid session token".to_string())
        })?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.user_id)))
}

fn command_topic(command: &str) -> Option<(bool, Topic)> {
    match command.trim() {
        "subscribe:leaderboard" => Some((true, Topic::Leaderboard)),
        "unsubscribe:leaderboard" => Some((false, Topic::Leaderboard)),
        "subscribe:activity-feed" => Some((true, Topic::ActivityFeed)),
        "unsubscribe:activity-feed" => Some((false, Topic::ActivityFeed)),
        _ => None,
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let socket_id = SocketId::next();
    let router = Arc::clone(state.engine.router());
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Personal topic is implicit; shared topics are command-driven.
    router
        .subscribe(Topic::User(user_id.clone()), socket_id, tx.clone())
        .await;
    info!(user_id = %user_id, socket = ?socket_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(command))) => {
                        let Some((subscribe, topic)) = command_topic(&command) else {
                            debug!(command = %command, "Ignoring unknown socket command");
                            continue;
                        };
                        if subscribe {
                            router.subscribe(topic, socket_id, tx.clone()).await;
                        } else {
                            router.unsubscribe(&topic, socket_id).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // pings and binary frames
                    Some(Err(_)) => break,
                }
            }
        }
    }

    router.disconnect(socket_id).await;
    info!(user_id = %user_id, socket = ?socket_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_map_to_topics() {
        assert_eq!(
            command_topic("subscribe:leaderboard"),
            Some((true, Topic::Leaderboard))
        );
        assert_eq!(
            command_topic("unsubscribe:activity-feed"),
            Some((false, Topic::ActivityFeed))
        );
        assert_eq!(command_topic("subscribe:user:u1"), None);
        assert_eq!(command_topic(""), None);
    }
}
