//! Bus errors.

use scaleout_protocol::ProtocolError;
use scaleout_transport::TransportError;
use thiserror::Error;

/// Errors returned by the scaleout bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been disposed.
    #[error("Scaleout bus has been disposed")]
    Disposed,

    /// A send carried no messages.
    #[error("Cannot send an empty batch")]
    EmptyBatch,

    /// Stream index out of range.
    #[error("Invalid stream index {index}: bus has {count} stream(s)")]
    InvalidStream { index: usize, count: usize },

    /// An endpoint could not be bound or connected.
    #[error("Connection to {endpoint} failed: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// The publisher rejected an envelope.
    #[error("Failed to transmit envelope: {0}")]
    Transmit(#[source] TransportError),

    /// A batch could not be serialized.
    #[error("Failed to encode batch: {0}")]
    Encode(#[source] ProtocolError),

    /// A peer frame could not be decoded.
    #[error("Failed to decode envelope: {0}")]
    Decode(#[from] ProtocolError),
}
