use thiserror::Error;

/// Errors that can occur while serving a client link.
#[derive(Error, Debug)]
pub enum FanoutError {
    /// The WebSocket handshake did not complete within the admission timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// Another entry is already registered for this address.
    #[error("address {0} already connected")]
    DuplicateAddress(String),
    /// The registry stopped accepting links for shutdown.
    #[error("server shutting down")]
    ShuttingDown,
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] fanout_common::FrameError),
    /// The connection was closed before admission finished.
    #[error("connection closed")]
    ConnectionClosed,
}
