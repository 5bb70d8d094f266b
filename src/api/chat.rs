//! Relay endpoint

use crate::api::AppState;
use crate::api::chat::schemas::{InboundFrame, OutboundFrame};
use crate::core::relay::RelaySession;
use crate::core::traits::ClientChannel;
use crate::error::RelayError;
use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use log::{debug, info, warn};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| relay(socket, state)),
        Err(rejection) => {
            warn!("{}", handshake_error(&rejection));
            rejection.into_response()
        }
    }
}

pub fn handshake_error(rejection: &WebSocketUpgradeRejection) -> RelayError {
    RelayError::Handshake(rejection.body_text())
}

async fn relay(socket: WebSocket, state: AppState) {
    let session = RelaySession::new(state.backend, &state.config);
    let id = session.id();
    info!("[{id}] client connected");

    let mut channel = WsChannel::new(socket);
    let cycles = session.run(&mut channel).await;

    // Fails harmlessly when the client is already gone; the socket is dropped either way.
    let _ = channel.socket.close().await;
    info!("[{id}] connection closed after {cycles} replies");
}

/// [`ClientChannel`] over an axum WebSocket, one JSON frame per message.
pub struct WsChannel {
    socket: WebSocket,
}

impl WsChannel {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl ClientChannel for WsChannel {
    async fn recv(&mut self) -> Result<Option<String>, RelayError> {
        loop {
            let message = match self.socket.recv().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!("websocket read failed: {e}");
                    return Err(RelayError::ClientDisconnected);
                }
                None => return Ok(None),
            };

            let frame: InboundFrame = match message {
                Message::Text(text) => serde_json::from_str(&text),
                Message::Binary(bytes) => serde_json::from_slice(&bytes),
                // axum answers pings itself
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return Ok(None),
            }
            .map_err(|e| RelayError::ClientProtocol(e.to_string()))?;

            return Ok(Some(frame.message));
        }
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), RelayError> {
        let text = serde_json::to_string(&frame)
            .map_err(|e| RelayError::ClientProtocol(e.to_string()))?;

        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|_| RelayError::ClientDisconnected)
    }
}

pub mod schemas {
    use serde::Deserialize;

    pub use crate::core::relay::OutboundFrame;

    /// Client to server frame.
    #[derive(Deserialize, Debug)]
    pub struct InboundFrame {
        pub message: String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::FromRequestParts;
    use axum::http::{Method, Request, StatusCode};

    #[tokio::test]
    async fn test_non_get_upgrade_is_a_handshake_error() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/ws")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let rejection = WebSocketUpgrade::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();

        assert_eq!(rejection.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            handshake_error(&rejection).to_string(),
            "handshake failed: Request method must be `GET`"
        );
    }
}
