//! Hands decoded batches to the host.

use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

use scaleout_protocol::{codec, ScaleoutMessage};
use scaleout_transport::Endpoint;

use crate::diagnostics::TraceSink;
use crate::error::BusError;
use crate::host::{ScaleoutHost, STREAM_INDEX};
use crate::metrics;

/// Delivers batches to the host on the bus's single stream.
pub struct Dispatcher {
    host: Arc<dyn ScaleoutHost>,
    trace: TraceSink,
}

impl Dispatcher {
    /// Create a dispatcher for `host`.
    pub fn new(host: Arc<dyn ScaleoutHost>, trace: TraceSink) -> Self {
        Self { host, trace }
    }

    /// Hand a batch to the host.
    pub fn deliver(&self, sequence_id: u64, message: ScaleoutMessage) {
        trace!(sequence_id, messages = message.len(), "Delivering batch");
        self.host.on_received(STREAM_INDEX, sequence_id, message);
    }

    /// Decode a frame received from `peer` and deliver it.
    ///
    /// Returns the envelope's sequence id.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Decode`] if the frame is shorter than a sequence
    /// id or its payload is not a valid batch. Nothing is delivered then.
    pub fn dispatch_frame(&self, peer: &Endpoint, frame: &Bytes) -> Result<u64, BusError> {
        let envelope = codec::decode(frame)?;
        let message = ScaleoutMessage::from_bytes(&envelope.payload)?;

        if self.trace.is_enabled() {
            self.trace.verbose(format_args!(
                "Received {} bytes from {} as #{}: {}",
                envelope.payload.len(),
                peer,
                envelope.sequence_id,
                message
            ));
        }

        metrics::record_received(frame.len());
        self.deliver(envelope.sequence_id, message);
        Ok(envelope.sequence_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::capture;
    use scaleout_protocol::Envelope;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<(usize, u64, ScaleoutMessage)>>,
    }

    impl ScaleoutHost for Recorder {
        fn on_received(&self, stream_index: usize, sequence_id: u64, message: ScaleoutMessage) {
            self.received
                .lock()
                .unwrap()
                .push((stream_index, sequence_id, message));
        }
    }

    fn dispatcher() -> (Arc<Recorder>, Dispatcher) {
        let recorder = Arc::new(Recorder::default());
        let host: Arc<dyn ScaleoutHost> = recorder.clone();
        (recorder, Dispatcher::new(host, TraceSink::new("test")))
    }

    fn peer() -> Endpoint {
        Endpoint::tcp("127.0.0.1", 6000)
    }

    #[test]
    fn test_dispatch_frame() {
        let (recorder, dispatcher) = dispatcher();
        let message = ScaleoutMessage::new(vec![Bytes::from_static(b"hello")]);
        let frame = codec::encode(&Envelope::new(7, message.to_bytes().unwrap()));

        assert_eq!(dispatcher.dispatch_frame(&peer(), &frame).unwrap(), 7);

        let received = recorder.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, STREAM_INDEX);
        assert_eq!(received[0].1, 7);
        assert_eq!(received[0].2.messages, vec![Bytes::from_static(b"hello")]);
    }

    #[test]
    fn test_short_frame_not_delivered() {
        let (recorder, dispatcher) = dispatcher();

        let result = dispatcher.dispatch_frame(&peer(), &Bytes::from_static(b"abc"));
        assert!(matches!(result, Err(BusError::Decode(_))));
        assert!(recorder.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_payload_not_delivered() {
        let (recorder, dispatcher) = dispatcher();
        let frame = codec::encode(&Envelope::new(1, Bytes::from_static(b"\xc1\xc1\xc1")));

        assert!(dispatcher.dispatch_frame(&peer(), &frame).is_err());
        assert!(recorder.received.lock().unwrap().is_empty());
    }

    fn hello_frame(sequence_id: u64) -> (usize, Bytes) {
        let payload = ScaleoutMessage::new(vec![Bytes::from_static(b"hello")])
            .to_bytes()
            .unwrap();
        (payload.len(), codec::encode(&Envelope::new(sequence_id, payload)))
    }

    #[test]
    fn test_receive_trace_skipped_when_disabled() {
        let (recorder, dispatcher) = dispatcher();
        let (_, frame) = hello_frame(3);
        let (subscriber, captured) = capture::subscriber(tracing::Level::INFO);

        tracing::subscriber::with_default(subscriber, || {
            dispatcher.dispatch_frame(&peer(), &frame).unwrap();
        });

        assert!(!captured.text().contains("Received"));
        assert_eq!(recorder.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_receive_trace_reports_payload_length() {
        let (_recorder, dispatcher) = dispatcher();
        let (payload_len, frame) = hello_frame(3);
        let (subscriber, captured) = capture::subscriber(tracing::Level::TRACE);

        tracing::subscriber::with_default(subscriber, || {
            dispatcher.dispatch_frame(&peer(), &frame).unwrap();
        });

        let text = captured.text();
        assert!(
            text.contains(&format!("Received {payload_len} bytes from tcp://127.0.0.1:6000 as #3: [hello]")),
            "{text}"
        );
    }

    #[test]
    fn test_deliver() {
        let (recorder, dispatcher) = dispatcher();
        dispatcher.deliver(1, ScaleoutMessage::new(vec![Bytes::from_static(b"a")]));
        dispatcher.deliver(2, ScaleoutMessage::new(vec![Bytes::from_static(b"b")]));

        let ids: Vec<u64> = recorder
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id, _)| *id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
