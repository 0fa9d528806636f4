//! Subscriber socket.
//!
//! A [`SubSocket`] connects to one or more publishers and queues the frames
//! that match its subscriptions. Connecting never fails because a publisher is
//! down: each connection runs in the background and keeps reconnecting until
//! the socket is closed. Frames from one publisher are queued in the order
//! that publisher sent them.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{ShutdownSignal, SocketLease, SocketOptions};
use crate::endpoint::Endpoint;
use crate::framing;
use crate::metrics::{LinkMetricsGuard, ROLE_SUBSCRIBER};
use crate::traits::{Socket, SocketId, TransportError};

type Inbound = Result<Bytes, TransportError>;

/// State shared with the connection tasks.
struct SubscriberShared {
    subscriptions: DashSet<Bytes>,
    inbox: mpsc::Sender<Inbound>,
    connected: AtomicUsize,
    reconnect_interval: Duration,
    max_frame_size: usize,
    shutdown: ShutdownSignal,
}

impl SubscriberShared {
    fn matches(&self, frame: &[u8]) -> bool {
        self.subscriptions
            .iter()
            .any(|prefix| frame.starts_with(prefix.key()))
    }

    /// Read frames from one link until it fails.
    async fn pump(&self, stream: TcpStream, endpoint: &Endpoint) -> TransportError {
        let mut reader = BufReader::new(stream);

        loop {
            match framing::read_frame(&mut reader, self.max_frame_size).await {
                Ok(Some(frame)) => {
                    if !self.matches(&frame) {
                        continue;
                    }
                    if self.inbox.send(Ok(frame)).await.is_err() {
                        return TransportError::Closed;
                    }
                }
                Ok(None) => {
                    return TransportError::ConnectionLost(format!(
                        "{endpoint} closed the connection"
                    ))
                }
                Err(e) => return e,
            }
        }
    }
}

/// A socket that receives frames from every publisher it connects to.
pub struct SubSocket {
    lease: SocketLease,
    closed: watch::Sender<bool>,
    shared: Arc<SubscriberShared>,
    inbox: Mutex<mpsc::Receiver<Inbound>>,
    connections: Mutex<Vec<JoinHandle<()>>>,
}

impl SubSocket {
    pub(crate) fn new(lease: SocketLease, options: SocketOptions) -> Self {
        let (closed, _) = watch::channel(false);
        let (inbox_tx, inbox_rx) = mpsc::channel(options.receive_high_water_mark.max(1));
        let shutdown = lease.signal(&closed);

        Self {
            lease,
            closed,
            shared: Arc::new(SubscriberShared {
                subscriptions: DashSet::new(),
                inbox: inbox_tx,
                connected: AtomicUsize::new(0),
                reconnect_interval: options.reconnect_interval,
                max_frame_size: options.max_frame_size,
                shutdown,
            }),
            inbox: Mutex::new(inbox_rx),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Connect to a publisher endpoint.
    ///
    /// The connection is established in the background and re-established
    /// whenever it drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        debug!(socket = %self.lease.id(), peer = %endpoint, "Subscriber connecting");

        let handle = tokio::spawn(connection_loop(endpoint.clone(), Arc::clone(&self.shared)));
        self.connections.lock().await.push(handle);

        Ok(())
    }

    /// Subscribe to frames starting with `prefix`. An empty prefix matches
    /// every frame.
    pub fn subscribe(&self, prefix: impl Into<Bytes>) {
        self.shared.subscriptions.insert(prefix.into());
    }

    /// Remove a subscription.
    ///
    /// Returns `true` if the prefix was subscribed.
    pub fn unsubscribe(&self, prefix: &[u8]) -> bool {
        self.shared.subscriptions.remove(prefix).is_some()
    }

    /// Number of publisher links currently connected.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Receive the next frame.
    ///
    /// Transient link failures are reported as errors without closing the
    /// socket; the next call keeps waiting for frames.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the socket is closed or its
    /// context terminated, and transient errors such as
    /// [`TransportError::ConnectionLost`] otherwise.
    pub async fn recv(&self) -> Result<Bytes, TransportError> {
        let mut shutdown = self.shared.shutdown.clone();
        if shutdown.is_set() {
            return Err(TransportError::Closed);
        }

        let mut inbox = tokio::select! {
            _ = shutdown.wait() => return Err(TransportError::Closed),
            inbox = self.inbox.lock() => inbox,
        };

        tokio::select! {
            _ = shutdown.wait() => Err(TransportError::Closed),
            item = inbox.recv() => item.unwrap_or(Err(TransportError::Closed)),
        }
    }
}

#[async_trait]
impl Socket for SubSocket {
    fn id(&self) -> SocketId {
        self.lease.id()
    }

    fn kind(&self) -> &'static str {
        "sub"
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(()); // Already closed
        }

        let handles = std::mem::take(&mut *self.connections.lock().await);
        let mut failure = None;
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    failure = Some(TransportError::Task(e.to_string()));
                }
            }
        }

        self.lease.release();
        debug!(socket = %self.lease.id(), "Subscriber closed");

        failure.map_or(Ok(()), Err)
    }

    fn close_now(&self) {
        if !self.closed.send_replace(true) {
            debug!(socket = %self.lease.id(), "Subscriber closed without waiting for tasks");
        }
        self.lease.release();
    }
}

/// Keep one publisher link alive until shutdown.
async fn connection_loop(endpoint: Endpoint, shared: Arc<SubscriberShared>) {
    let mut shutdown = shared.shutdown.clone();
    let mut failed_attempts: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = shutdown.wait() => break,
            result = TcpStream::connect(endpoint.authority()) => result,
        };

        match connected {
            Ok(stream) => {
                failed_attempts = 0;
                let _ = stream.set_nodelay(true);
                info!(peer = %endpoint, "Connected to publisher");

                let metrics_guard = LinkMetricsGuard::new(ROLE_SUBSCRIBER);
                shared.connected.fetch_add(1, Ordering::SeqCst);

                let outcome = tokio::select! {
                    _ = shutdown.wait() => None,
                    err = shared.pump(stream, &endpoint) => Some(err),
                };

                shared.connected.fetch_sub(1, Ordering::SeqCst);
                drop(metrics_guard);

                match outcome {
                    None | Some(TransportError::Closed) => break,
                    Some(err) => {
                        warn!(peer = %endpoint, error = %err, "Lost connection to publisher");
                        // Reported to the reader as a transient error; skipped if the inbox is full.
                        let _ = shared.inbox.try_send(Err(err));
                    }
                }
            }
            Err(e) => {
                failed_attempts += 1;
                if failed_attempts == 1 {
                    warn!(peer = %endpoint, error = %e, "Connect failed, retrying");
                } else {
                    debug!(peer = %endpoint, attempts = failed_attempts, "Still unable to connect");
                }
            }
        }

        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(shared.reconnect_interval) => {}
        }
    }

    debug!(peer = %endpoint, "Subscriber connection stopped");
}
