//! WebSocket subscriptions
//!
//! `/ws/games/:game_id` streams game events, `/ws/users/:user_id` streams
//! balance and prize notifications. Each socket is attached to the broadcast
//! hub as a [`Connection`]; the hub's writer task owns the sink, this module
//! owns the read half and tears the writer down when the client goes away.

use super::{errors::ApiError, handlers::AppState, middleware::RequestId};
use crate::{
    common::traits::{Connection, ConnectionClosed},
    games::types::BingoEvent,
    hub::{BroadcastHub, Topic},
};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    Extension,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outbound half of a client socket
pub struct WsConnection {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, event: &BingoEvent) -> Result<(), ConnectionClosed> {
        let text = serde_json::to_string(event).map_err(|e| ConnectionClosed(format!("encode: {}", e)))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| ConnectionClosed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

async fn serve_socket(socket: WebSocket, topic: Topic, hub: BroadcastHub) {
    let (sink, mut stream) = socket.split();
    let writer = hub.attach(topic.clone(), WsConnection { sink });
    info!(topic = %topic, subscribers = hub.subscriber_count(&topic), "WebSocket client connected");

    // Clients only listen; inbound traffic is drained until close
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(Message::Text(text)) => debug!(topic = %topic, %text, "Ignoring client message"),
            Ok(_) => {}
            Err(e) => {
                warn!(topic = %topic, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    writer.abort();
    info!(topic = %topic, "WebSocket client disconnected");
}

/// GET /ws/games/:game_id
pub async fn game_websocket_handler(
    ws: WebSocketUpgrade,
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Response, ApiError> {
    state
        .controller
        .store()
        .require_game(&game_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, Topic::Game(game_id), hub)))
}

/// GET /ws/users/:user_id
pub async fn user_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, Topic::User(user_id), hub))
}
