//! Seams between the relay and its two peers: the inference backend and the client connection.

use crate::core::memory::Turn;
use crate::core::relay::OutboundFrame;
use crate::error::RelayError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Incremental text fragments of one backend reply. An `Err` item means the read broke off;
/// fragments yielded before it are still valid.
pub type FragmentStream = BoxStream<'static, Result<String, RelayError>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Starts one streaming chat completion for the given outbound view.
    ///
    /// Returns `Err` if the backend can't be reached or refuses the request; nothing has been
    /// generated in that case.
    async fn stream_chat(&self, messages: &[Turn]) -> Result<FragmentStream, RelayError>;
}

/// The client side of one relay connection.
#[async_trait]
pub trait ClientChannel: Send {
    /// Waits for the next user message.
    ///
    /// Returns `Ok(None)` when the client closed the connection.
    async fn recv(&mut self) -> Result<Option<String>, RelayError>;

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), RelayError>;
}
