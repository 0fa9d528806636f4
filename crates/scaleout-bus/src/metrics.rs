//! Bus-level metrics.
//!
//! Uses the `metrics` facade; the host process installs whatever exporter it
//! wants.

use metrics::counter;
use tracing::debug;

/// Metric names.
pub mod names {
    pub const ENVELOPES_SENT: &str = "scaleout_envelopes_sent_total";
    pub const ENVELOPES_RECEIVED: &str = "scaleout_envelopes_received_total";
    pub const ENVELOPE_BYTES: &str = "scaleout_envelope_bytes_total";
    pub const DECODE_ERRORS: &str = "scaleout_decode_errors_total";
    pub const RECEIVE_ERRORS: &str = "scaleout_receive_errors_total";
    pub const TRANSMIT_ERRORS: &str = "scaleout_transmit_errors_total";
    pub const CONNECTION_ERRORS: &str = "scaleout_connection_errors_total";
    pub const DISPOSE_ERRORS: &str = "scaleout_dispose_errors_total";
}

/// Describe the bus metrics to the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(names::ENVELOPES_SENT, "Envelopes published to peers");
    metrics::describe_counter!(
        names::ENVELOPES_RECEIVED,
        "Envelopes received from peers and handed to the host"
    );
    metrics::describe_counter!(names::ENVELOPE_BYTES, "Envelope bytes sent and received");
    metrics::describe_counter!(names::DECODE_ERRORS, "Peer frames that failed to decode");
    metrics::describe_counter!(names::RECEIVE_ERRORS, "Transient receive failures");
    metrics::describe_counter!(names::TRANSMIT_ERRORS, "Envelopes that failed to publish");
    metrics::describe_counter!(
        names::CONNECTION_ERRORS,
        "Endpoints that could not be bound or connected at startup"
    );
    metrics::describe_counter!(names::DISPOSE_ERRORS, "Teardown steps that failed");

    debug!("Scaleout metrics described");
}

/// Record a published envelope.
pub fn record_sent(bytes: usize) {
    counter!(names::ENVELOPES_SENT).increment(1);
    counter!(names::ENVELOPE_BYTES, "direction" => "out").increment(bytes as u64);
}

/// Record an envelope received from a peer.
pub fn record_received(bytes: usize) {
    counter!(names::ENVELOPES_RECEIVED).increment(1);
    counter!(names::ENVELOPE_BYTES, "direction" => "in").increment(bytes as u64);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!(names::DECODE_ERRORS).increment(1);
}

/// Record a transient receive failure.
pub fn record_receive_error() {
    counter!(names::RECEIVE_ERRORS).increment(1);
}

/// Record a failed publish.
pub fn record_transmit_error() {
    counter!(names::TRANSMIT_ERRORS).increment(1);
}

/// Record an endpoint that failed at startup.
pub fn record_connection_error(role: &'static str) {
    counter!(names::CONNECTION_ERRORS, "role" => role).increment(1);
}

/// Record a failed teardown step.
pub fn record_dispose_error() {
    counter!(names::DISPOSE_ERRORS).increment(1);
}
