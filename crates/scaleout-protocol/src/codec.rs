//! Codec for encoding and decoding scaleout envelopes.
//!
//! An envelope on the wire is:
//! - 8 bytes: big-endian sequence id
//! - N bytes: opaque payload
//!
//! The payload has no length prefix. The transport delimits frames, so the
//! payload length is whatever follows the sequence id.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the sequence id header in bytes.
pub const SEQUENCE_ID_SIZE: usize = 8;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is too short to carry a sequence id.
    #[error("Truncated envelope: got {len} bytes, need at least {SEQUENCE_ID_SIZE}")]
    Truncated {
        /// Length of the rejected frame.
        len: usize,
    },

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A sequenced payload as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Per-publisher monotonic sequence id.
    pub sequence_id: u64,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(sequence_id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// Size of this envelope once encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        SEQUENCE_ID_SIZE + self.payload.len()
    }
}

/// Encode an envelope to bytes.
#[must_use]
pub fn encode(envelope: &Envelope) -> Bytes {
    let mut buf = BytesMut::with_capacity(envelope.encoded_len());
    encode_into(envelope, &mut buf);
    buf.freeze()
}

/// Encode an envelope into an existing buffer.
pub fn encode_into(envelope: &Envelope, buf: &mut BytesMut) {
    buf.reserve(envelope.encoded_len());
    buf.put_u64(envelope.sequence_id);
    buf.extend_from_slice(&envelope.payload);
}

/// Decode an envelope from a received frame.
///
/// The payload is a zero-copy slice of `frame`.
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] if the frame is shorter than the
/// sequence id header.
pub fn decode(frame: &Bytes) -> Result<Envelope, ProtocolError> {
    if frame.len() < SEQUENCE_ID_SIZE {
        return Err(ProtocolError::Truncated { len: frame.len() });
    }

    let sequence_id = (&frame[..SEQUENCE_ID_SIZE]).get_u64();
    let payload = frame.slice(SEQUENCE_ID_SIZE..);

    Ok(Envelope {
        sequence_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sequence_id_is_big_endian() {
        let encoded = encode(&Envelope::new(0x0102_0304_0506_0708, b"xy".to_vec()));
        assert_eq!(&encoded[..], &[1, 2, 3, 4, 5, 6, 7, 8, b'x', b'y']);
    }

    #[test]
    fn test_empty_payload() {
        let encoded = encode(&Envelope::new(7, Bytes::new()));
        assert_eq!(encoded.len(), SEQUENCE_ID_SIZE);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.sequence_id, 7);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        for len in 0..SEQUENCE_ID_SIZE {
            let frame = Bytes::from(vec![0xAB; len]);
            match decode(&frame) {
                Err(ProtocolError::Truncated { len: got }) => assert_eq!(got, len),
                other => panic!("Expected Truncated error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        encode_into(&Envelope::new(1, b"a".to_vec()), &mut buf);
        encode_into(&Envelope::new(2, b"b".to_vec()), &mut buf);
        assert_eq!(buf.len(), 2 * (SEQUENCE_ID_SIZE + 1));

        let second = buf.split_off(SEQUENCE_ID_SIZE + 1).freeze();
        assert_eq!(decode(&buf.freeze()).unwrap().sequence_id, 1);
        assert_eq!(decode(&second).unwrap().payload, Bytes::from_static(b"b"));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(sequence_id in any::<u64>(), payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let envelope = Envelope::new(sequence_id, payload.clone());
            let decoded = decode(&encode(&envelope)).unwrap();
            prop_assert_eq!(decoded.sequence_id, sequence_id);
            prop_assert_eq!(&decoded.payload[..], &payload[..]);
        }
    }
}
