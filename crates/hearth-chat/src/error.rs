//! Error types for the chat client.

use hearth_api::ApiError;
use thiserror::Error;

use crate::transport::ConnectionState;

/// Error raised by a user hook or command handler.
///
/// Never reaches the transport: the dispatcher logs it and moves on.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A single frame could not be decoded. Only that frame is affected.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Fewer than four bytes, so no opcode.
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    /// The opcode is not four ASCII characters.
    #[error("invalid opcode: {0:?}")]
    InvalidOpcode(String),

    /// The remainder after the opcode is not JSON.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors that can occur while running the chat client.
#[derive(Debug, Error)]
pub enum ChatError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Operation not valid in the current connection state.
    #[error("invalid state: expected {expected}, was {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: ConnectionState,
    },

    /// `send` called while not connected.
    #[error("not connected")]
    NotConnected,

    /// The routing endpoint did not yield a usable socket host.
    #[error("routing failed: {0}")]
    Routing(String),

    /// The routing request itself failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::WebSocket(e.to_string())
    }
}
