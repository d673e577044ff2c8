use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Convenient type alias for `Result<T, MuxError>`.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Error types for the kubemux library.
///
/// `MuxError` covers everything a caller can observe: transport failures,
/// buffer limits, misuse of a channel stream and shutdown races. Failures of
/// the background receive loop never surface here; they end every channel
/// with an orderly end-of-data instead.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Buffer overflow: {requested} bytes requested (max: {max})")]
    BufferOverflow { requested: usize, max: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A channel stream needs a read channel, a write channel or both")]
    NoChannel,

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("No tokio runtime available")]
    NoRuntime,

    #[error("Demuxer already started")]
    AlreadyStarted,

    #[error("Blocking call made on a current-thread runtime's own thread")]
    BlockingInRuntime,
}

impl MuxError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            MuxError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            MuxError::Cancelled => true,
            MuxError::WebSocket(_)
            | MuxError::Closed
            | MuxError::BufferOverflow { .. }
            | MuxError::Config(_)
            | MuxError::NoChannel
            | MuxError::Unsupported(_)
            | MuxError::NoRuntime
            | MuxError::AlreadyStarted
            | MuxError::BlockingInRuntime => false,
        }
    }
}

impl From<MuxError> for io::Error {
    fn from(err: MuxError) -> Self {
        let kind = match &err {
            MuxError::Io(e) => e.kind(),
            MuxError::Closed => io::ErrorKind::BrokenPipe,
            MuxError::Cancelled => io::ErrorKind::Interrupted,
            MuxError::Unsupported(_) => io::ErrorKind::Unsupported,
            MuxError::NoChannel | MuxError::Config(_) => io::ErrorKind::InvalidInput,
            MuxError::BlockingInRuntime => io::ErrorKind::WouldBlock,
            _ => io::ErrorKind::Other,
        };
        match err {
            MuxError::Io(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}
