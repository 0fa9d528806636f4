//! Socket abstraction traits for the scaleout transport.
//!
//! Publisher and subscriber sockets share an identity, an error type, and a
//! close operation, so owners can tear them down uniformly.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a socket within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

impl SocketId {
    /// Get the raw id.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sock_{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint URI could not be parsed.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Connection to a peer was lost; the socket will reconnect.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Socket was closed.
    #[error("Socket closed")]
    Closed,

    /// The owning context has been terminated.
    #[error("Context terminated")]
    ContextTerminated,

    /// Context terminated while sockets were still open.
    #[error("Context terminated with {0} socket(s) still open")]
    SocketsStillOpen(usize),

    /// A socket task failed.
    #[error("Socket task failed: {0}")]
    Task(String),
}

impl TransportError {
    /// Whether this error means the socket is gone for good.
    ///
    /// Every other error is transient from a reader's point of view.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::ContextTerminated)
    }
}

/// A socket owned by a transport context.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Get the socket's identifier.
    fn id(&self) -> SocketId;

    /// Get the socket kind (e.g., "pub", "sub").
    fn kind(&self) -> &'static str;

    /// Check if the socket has been closed.
    fn is_closed(&self) -> bool;

    /// Close the socket and stop its background tasks.
    ///
    /// Closing an already closed socket is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Close the socket without waiting for its background tasks.
    ///
    /// The socket is released from its context immediately; the tasks stop
    /// once they observe the close. Usable where awaiting is not possible.
    fn close_now(&self);
}
