//! Contracts between the bus and the hosting server.
//!
//! The host supplies diagnostics through a [`DependencyResolver`] and receives
//! every batch, local or remote, through [`ScaleoutHost::on_received`]. Hosts
//! publish through the [`MessageBus`] contract.

use async_trait::async_trait;
use bytes::Bytes;

use scaleout_protocol::ScaleoutMessage;

use crate::diagnostics::TraceSink;
use crate::error::BusError;

/// Index of a logical stream on the bus.
pub type StreamIndex = usize;

/// The single stream this bus carries.
pub const STREAM_INDEX: StreamIndex = 0;

/// Number of streams this bus carries.
pub const STREAM_COUNT: usize = 1;

/// Supplies shared services, such as diagnostics, to the bus.
pub trait DependencyResolver: Send + Sync {
    /// Get the trace sink registered under `name`.
    fn trace_sink(&self, name: &str) -> TraceSink;
}

/// Resolver that backs every trace sink with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingResolver;

impl DependencyResolver for TracingResolver {
    fn trace_sink(&self, name: &str) -> TraceSink {
        TraceSink::new(name)
    }
}

/// Publishing side of a scaleout bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Broadcast a batch of messages to every node, this one included.
    async fn send(&self, stream_index: StreamIndex, messages: Vec<Bytes>) -> Result<(), BusError>;

    /// Number of logical streams.
    fn stream_count(&self) -> usize;
}

/// Receiving side: the server that hosts the bus.
///
/// `on_received` runs on the bus's own tasks. Batches from one origin node
/// arrive in that node's send order; batches from different origins may
/// interleave.
pub trait ScaleoutHost: Send + Sync {
    /// Handle a batch delivered on `stream_index`.
    fn on_received(&self, stream_index: StreamIndex, sequence_id: u64, message: ScaleoutMessage);

    /// Release host resources. Called once, after the bus has shut down.
    fn dispose(&self) {}
}
