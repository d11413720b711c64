//! Error types for regionrpc.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all client operations.
///
/// The client delivers a clone of its terminal error to every outstanding
/// call, so the type is `Clone`; the `Io` variant wraps its source in an
/// `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The connection accepted fewer bytes than were offered.
    #[error("short write")]
    ShortWrite,

    /// A call's payload could not be serialized. Local to that one call.
    #[error("failed to serialize RPC: {0}")]
    Serialize(String),

    /// The read side of the connection failed.
    #[error("failed to read: {0}")]
    Read(String),

    /// The server violated the wire protocol (malformed frame, response
    /// for a call id we never sent, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server processed the call and answered with an exception.
    /// Local to that one call.
    #[error("exception from server: {class}: {stack_trace}")]
    RemoteException {
        /// Java class name of the exception.
        class: String,
        /// Server-side stack trace, if provided.
        stack_trace: String,
    },

    /// The client has been shut down.
    #[error("client is dead")]
    ClientDead,

    /// Wrapper marking that the whole client is dead. The cause is the
    /// first error that made it terminal. Callers use this to decide to
    /// reconnect through an outer layer.
    #[error("{0}")]
    Unrecoverable(Arc<RpcError>),
}

impl RpcError {
    /// Wrap this error as [`RpcError::Unrecoverable`]. Already-wrapped
    /// errors are returned unchanged.
    pub fn unrecoverable(self) -> RpcError {
        match self {
            err @ RpcError::Unrecoverable(_) => err,
            err => RpcError::Unrecoverable(Arc::new(err)),
        }
    }

    /// Whether this error signals that the whole client is dead.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, RpcError::Unrecoverable(_))
    }

    /// The originating error: the wrapped cause for
    /// [`RpcError::Unrecoverable`], `self` otherwise.
    pub fn cause(&self) -> &RpcError {
        match self {
            RpcError::Unrecoverable(inner) => inner,
            other => other,
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io(Arc::new(err))
    }
}

/// Result type alias using [`RpcError`].
pub type Result<T> = std::result::Result<T, RpcError>;
