//! Scaleout message batches.
//!
//! A [`ScaleoutMessage`] is the batch of application messages one `send` call
//! hands to the backplane. It is serialized with MessagePack and carried as the
//! payload of an [`Envelope`](crate::codec::Envelope).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::ProtocolError;

/// Longest message prefix shown by the `Display` rendering.
const DISPLAY_PREVIEW_LEN: usize = 64;

/// A batch of opaque application messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleoutMessage {
    /// Application messages, in send order.
    pub messages: Vec<Bytes>,
    /// Milliseconds since the Unix epoch when the batch was built.
    pub server_creation_time: u64,
}

impl ScaleoutMessage {
    /// Create a batch stamped with the current time.
    #[must_use]
    pub fn new(messages: Vec<Bytes>) -> Self {
        let server_creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            messages,
            server_creation_time,
        }
    }

    /// Number of messages in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the batch carries no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Serialize the batch to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if MessagePack encoding fails.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?.into())
    }

    /// Deserialize a batch from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid batch.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

impl fmt::Display for ScaleoutMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, message) in self.messages.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let shown = &message[..message.len().min(DISPLAY_PREVIEW_LEN)];
            write!(f, "{}", String::from_utf8_lossy(shown))?;
            if message.len() > DISPLAY_PREVIEW_LEN {
                write!(f, "...")?;
            }
        }
        write!(f, "] @{}", self.server_creation_time)
    }
}
