//! # scaleout-protocol
//!
//! Wire format for the scaleout backplane.
//!
//! Two layers live here:
//!
//! - [`codec`] - the envelope: an 8-byte big-endian sequence id followed by an
//!   opaque payload
//! - [`message`] - the batch of application messages carried as that payload,
//!   encoded with MessagePack
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use scaleout_protocol::{codec, Envelope, ScaleoutMessage};
//!
//! let batch = ScaleoutMessage::new(vec![Bytes::from_static(b"hello")]);
//! let envelope = Envelope::new(1, batch.to_bytes().unwrap());
//!
//! let frame = codec::encode(&envelope);
//! let decoded = codec::decode(&frame).unwrap();
//! assert_eq!(ScaleoutMessage::from_bytes(&decoded.payload).unwrap(), batch);
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode, Envelope, ProtocolError, SEQUENCE_ID_SIZE};
pub use message::ScaleoutMessage;
