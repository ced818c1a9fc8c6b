use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced by the mined transaction stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect to Alchemy WS: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("failed to marshal subscription request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to subscribe: {0}")]
    Subscribe(#[source] tungstenite::Error),

    #[error("stream is already subscribed")]
    AlreadySubscribed,

    #[error("client is closed")]
    Closed,

    #[error("read error: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("connection closed by remote: {0}")]
    ClosedByRemote(String),

    #[error("stream ended without a close frame")]
    StreamEnded,

    #[error("failed to close connection: {0}")]
    Close(#[source] tungstenite::Error),
}
