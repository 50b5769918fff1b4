use thiserror::Error;

/// Errors returned by clipboard operations
///
/// Transport-level failures (connection errors, failed round-trips, pipe
/// I/O) are folded into [`Error::Unavailable`] since callers cannot act on
/// them differently; the original cause is kept in the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A backend exists but the clipboard, display server or compositor
    /// extension is not reachable right now. May succeed on retry.
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),

    /// The requested format is not handled by any available backend.
    /// Not retryable without changing the request.
    #[error("unsupported clipboard format")]
    Unsupported,

    /// No clipboard backend implementation exists for this platform.
    #[error("clipboard is not supported on this platform")]
    UnsupportedPlatform,
}

impl Error {
    /// Wrap a transport-level failure into `Unavailable`
    pub(crate) fn unavailable(cause: impl std::fmt::Display) -> Self {
        Error::Unavailable(cause.to_string())
    }
}
