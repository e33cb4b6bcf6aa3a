use bench_core::SessionId;

/// Errors from session-addressed manager calls.
///
/// Connection failures never show up here; they are absorbed by the
/// reconnect loop.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not acquired: {0}")]
    NotFound(SessionId),

    /// Released ids are never reused.
    #[error("session already released: {0}")]
    Released(SessionId),
}
