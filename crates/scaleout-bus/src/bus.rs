//! The scaleout message bus.
//!
//! Every node publishes its outgoing batches on one publisher socket and
//! subscribes to every peer's publisher. A batch sent on a node is stamped
//! with the node's next sequence id, published to the peers, then handed to
//! the local host directly, so the sender sees its own batches without a
//! network round trip.
//!
//! Each peer gets its own receive loop. A peer that is down, slow, or sending
//! garbage only affects its own loop.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use scaleout_protocol::{codec, Envelope, ScaleoutMessage};
use scaleout_transport::{Context, Endpoint, PubSocket, Socket, SubSocket, TransportError};

use crate::config::ScaleoutConfig;
use crate::diagnostics::TraceSink;
use crate::dispatch::Dispatcher;
use crate::error::BusError;
use crate::host::{DependencyResolver, MessageBus, ScaleoutHost, StreamIndex, STREAM_COUNT};
use crate::lifecycle::{DisposeReport, Disposer};
use crate::metrics;

/// Name of the trace sink the bus logs per-message detail to.
pub const TRACE_SINK_NAME: &str = "SignalR.ScaleoutMessageBus";

/// A subscription to one peer's publisher.
struct Peer {
    endpoint: Endpoint,
    socket: Arc<SubSocket>,
}

/// Message bus that mirrors every batch to a fixed set of peer nodes.
pub struct ScaleoutBus {
    config: ScaleoutConfig,
    context: Context,
    publisher: Option<PubSocket>,
    local_endpoint: Option<Endpoint>,
    peers: Vec<Peer>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Arc<Dispatcher>,
    host: Arc<dyn ScaleoutHost>,
    trace: TraceSink,
    sequence: AtomicU64,
    /// Serializes id assignment, publish, and local delivery.
    send_gate: Mutex<()>,
    disposed: AtomicBool,
    stopping: Arc<AtomicBool>,
}

impl ScaleoutBus {
    /// Start the bus: bind the publisher, connect to every peer, and start
    /// one receive loop per peer.
    ///
    /// Endpoints that fail are logged and skipped; the bus runs with whatever
    /// came up. If the publisher cannot bind, sends fail with
    /// [`BusError::Transmit`] but peers are still received.
    pub async fn start(
        resolver: &dyn DependencyResolver,
        config: ScaleoutConfig,
        host: Arc<dyn ScaleoutHost>,
    ) -> Self {
        metrics::describe_metrics();

        let trace = resolver.trace_sink(TRACE_SINK_NAME);
        let context = Context::with_options(config.socket_options());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&host), trace.clone()));
        let stopping = Arc::new(AtomicBool::new(false));

        let (publisher, local_endpoint) = match bind_publisher(&context, config.listen_address()).await {
            Ok((publisher, local)) => (Some(publisher), Some(local)),
            Err(e) => {
                error!(error = %e, "Publisher unavailable, sends will fail");
                metrics::record_connection_error("publisher");
                (None, None)
            }
        };

        let mut peers = Vec::with_capacity(config.subscriber_addresses().len());
        let mut loops = Vec::with_capacity(config.subscriber_addresses().len());

        for address in config.subscriber_addresses() {
            match connect_peer(&context, address).await {
                Ok(peer) => {
                    loops.push(tokio::spawn(receive_loop(
                        peer.endpoint.clone(),
                        Arc::clone(&peer.socket),
                        Arc::clone(&dispatcher),
                        Arc::clone(&stopping),
                    )));
                    peers.push(peer);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping peer");
                    metrics::record_connection_error("subscriber");
                }
            }
        }

        info!(
            listen = ?local_endpoint.as_ref().map(ToString::to_string),
            peers = peers.len(),
            "Scaleout bus started"
        );

        Self {
            config,
            context,
            publisher,
            local_endpoint,
            peers,
            loops: Mutex::new(loops),
            dispatcher,
            host,
            trace,
            sequence: AtomicU64::new(0),
            send_gate: Mutex::new(()),
            disposed: AtomicBool::new(false),
            stopping,
        }
    }

    /// Configuration the bus was started with.
    #[must_use]
    pub fn config(&self) -> &ScaleoutConfig {
        &self.config
    }

    /// Endpoint the publisher is bound to, with any ephemeral port resolved.
    ///
    /// `None` if the publisher failed to bind.
    #[must_use]
    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.local_endpoint.as_ref()
    }

    /// Number of peers with a running receive loop.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of peer publishers currently connected.
    #[must_use]
    pub fn connected_peers(&self) -> usize {
        self.peers.iter().map(|p| p.socket.connected_count()).sum()
    }

    /// Number of peers currently subscribed to this node's publisher.
    #[must_use]
    pub fn subscriber_links(&self) -> usize {
        self.publisher.as_ref().map_or(0, PubSocket::link_count)
    }

    /// Sequence id of the last batch sent, 0 if none.
    #[must_use]
    pub fn last_sequence_id(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Check if the bus has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Shut the bus down.
    ///
    /// Stops the receive loops, closes every socket, terminates the transport
    /// context, then disposes the host. Every step runs even if an earlier
    /// one fails; failures are returned in the report. Disposing again is a
    /// no-op that returns an empty report.
    pub async fn dispose(&self) -> DisposeReport {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return DisposeReport::default();
        }

        info!("Disposing scaleout bus");

        // Let an in-flight send finish before its publisher goes away.
        let _gate = self.send_gate.lock().await;
        self.stopping.store(true, Ordering::SeqCst);

        let mut disposer = Disposer::new();

        if let Some(publisher) = &self.publisher {
            disposer.attempt("publisher", publisher.close().await);
        }

        for peer in &self.peers {
            disposer.attempt(&peer.endpoint.to_string(), peer.socket.close().await);
        }

        let deadline = Instant::now() + self.config.dispose_timeout();
        let loops = std::mem::take(&mut *self.loops.lock().await);
        for mut handle in loops {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => disposer.fail("receive loop", TransportError::Task(e.to_string())),
                Err(_) => {
                    handle.abort();
                    disposer.fail(
                        "receive loop",
                        TransportError::Task("did not stop before the dispose timeout".into()),
                    );
                }
            }
        }

        disposer.attempt("transport context", self.context.terminate());

        self.host.dispose();

        let report = disposer.finish();
        info!(failures = report.failures().len(), "Scaleout bus disposed");
        report
    }

    async fn publish(&self, messages: Vec<Bytes>) -> Result<(), BusError> {
        let message = ScaleoutMessage::new(messages);
        let payload = message.to_bytes().map_err(BusError::Encode)?;

        let _gate = self.send_gate.lock().await;
        if self.is_disposed() {
            return Err(BusError::Disposed);
        }

        let publisher = self
            .publisher
            .as_ref()
            .ok_or(BusError::Transmit(TransportError::Closed))?;

        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let payload_len = payload.len();
        let frame = codec::encode(&Envelope::new(sequence_id, payload));

        if self.trace.is_enabled() {
            self.trace.verbose(format_args!(
                "Sending {} bytes as #{}: {}",
                payload_len,
                sequence_id,
                message
            ));
        }

        match publisher.send(&frame) {
            Ok(links) => {
                trace!(sequence_id, links, "Envelope published");
                metrics::record_sent(frame.len());
            }
            Err(e) => {
                error!(sequence_id, error = %e, "Failed to publish envelope");
                metrics::record_transmit_error();
                return Err(BusError::Transmit(e));
            }
        }

        // Publishers never hear their own frames; deliver locally.
        self.dispatcher.deliver(sequence_id, message);
        Ok(())
    }
}

#[async_trait]
impl MessageBus for ScaleoutBus {
    async fn send(&self, stream_index: StreamIndex, messages: Vec<Bytes>) -> Result<(), BusError> {
        if self.is_disposed() {
            return Err(BusError::Disposed);
        }
        if stream_index >= STREAM_COUNT {
            return Err(BusError::InvalidStream {
                index: stream_index,
                count: STREAM_COUNT,
            });
        }
        if messages.is_empty() {
            return Err(BusError::EmptyBatch);
        }

        self.publish(messages).await
    }

    fn stream_count(&self) -> usize {
        STREAM_COUNT
    }
}

impl Drop for ScaleoutBus {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropped without dispose: stop background work without waiting.
        self.stopping.store(true, Ordering::SeqCst);
        for handle in self.loops.get_mut().drain(..) {
            handle.abort();
        }

        // Sockets first, context last.
        if let Some(publisher) = self.publisher.take() {
            publisher.close_now();
        }
        for peer in self.peers.drain(..) {
            peer.socket.close_now();
        }

        if let Err(e) = self.context.terminate() {
            debug!(error = %e, "Transport context did not terminate cleanly");
        }
        debug!("Scaleout bus dropped without dispose");
    }
}

async fn bind_publisher(context: &Context, address: &str) -> Result<(PubSocket, Endpoint), BusError> {
    let connection_error = |source: TransportError| BusError::Connection {
        endpoint: address.to_string(),
        source,
    };

    let endpoint = Endpoint::parse(address).map_err(connection_error)?;
    let publisher = context.publisher().map_err(connection_error)?;
    let local = publisher.bind(&endpoint).await.map_err(connection_error)?;

    Ok((publisher, local))
}

async fn connect_peer(context: &Context, address: &str) -> Result<Peer, BusError> {
    let connection_error = |source: TransportError| BusError::Connection {
        endpoint: address.to_string(),
        source,
    };

    let endpoint = Endpoint::parse(address).map_err(connection_error)?;
    let socket = context.subscriber().map_err(connection_error)?;
    socket.subscribe(Bytes::new());
    socket.connect(&endpoint).await.map_err(connection_error)?;

    debug!(peer = %endpoint, "Subscribed to peer");
    Ok(Peer {
        endpoint,
        socket: Arc::new(socket),
    })
}

/// Receive one peer's envelopes until the bus stops.
async fn receive_loop(
    peer: Endpoint,
    socket: Arc<SubSocket>,
    dispatcher: Arc<Dispatcher>,
    stopping: Arc<AtomicBool>,
) {
    debug!(peer = %peer, "Receive loop started");

    while !stopping.load(Ordering::SeqCst) {
        match socket.recv().await {
            Ok(frame) => {
                if let Err(e) = dispatcher.dispatch_frame(&peer, &frame) {
                    warn!(peer = %peer, bytes = frame.len(), error = %e, "Dropping undecodable frame");
                    metrics::record_decode_error();
                }
            }
            Err(e) if e.is_closed() => break,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Receive failed, waiting for next frame");
                metrics::record_receive_error();
            }
        }
    }

    debug!(peer = %peer, "Receive loop stopped");
}
