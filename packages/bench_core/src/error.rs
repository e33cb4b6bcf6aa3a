use tokio_tungstenite::tungstenite;

/// Errors raised while dialing or driving a socket.
///
/// These never reach the user: both socket owners turn every variant into a
/// scheduled reconnect.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("connect to {url} timed out after {after:?}")]
    TimedOut { url: String, after: std::time::Duration },

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

impl TransportError {
    pub fn connect_failed(url: &str, reason: impl ToString) -> Self {
        Self::ConnectFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
