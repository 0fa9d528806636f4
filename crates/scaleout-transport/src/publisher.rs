//! Publisher socket.
//!
//! A [`PubSocket`] binds one or more endpoints and fans every sent frame out
//! to all currently connected subscriber links. Frames sent while nobody is
//! connected are dropped, and a link that falls more than the send high-water
//! mark behind loses the frames it missed. Order on each link matches send
//! order.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::context::{ShutdownSignal, SocketLease, SocketOptions};
use crate::endpoint::Endpoint;
use crate::framing;
use crate::metrics::{self, LinkMetricsGuard, ROLE_PUBLISHER};
use crate::traits::{Socket, SocketId, TransportError};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared with the listener and link tasks.
struct PublisherShared {
    sender: broadcast::Sender<Bytes>,
    links: DashMap<u64, SocketAddr>,
    next_link_id: AtomicU64,
    shutdown: ShutdownSignal,
}

/// A socket that publishes frames to every connected subscriber.
pub struct PubSocket {
    lease: SocketLease,
    options: SocketOptions,
    closed: watch::Sender<bool>,
    shared: Arc<PublisherShared>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl PubSocket {
    pub(crate) fn new(lease: SocketLease, options: SocketOptions) -> Self {
        let (closed, _) = watch::channel(false);
        let (sender, _) = broadcast::channel(options.send_high_water_mark.max(1));
        let shutdown = lease.signal(&closed);

        Self {
            lease,
            options,
            closed,
            shared: Arc::new(PublisherShared {
                sender,
                links: DashMap::new(),
                next_link_id: AtomicU64::new(0),
                shutdown,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Bind to an endpoint and start accepting subscribers.
    ///
    /// Returns the endpoint actually bound, with an ephemeral port resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed or the bind fails.
    pub async fn bind(&self, endpoint: &Endpoint) -> Result<Endpoint, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let listener = TcpListener::bind(endpoint.authority()).await?;
        let local = Endpoint::from(listener.local_addr()?);

        info!(socket = %self.lease.id(), endpoint = %local, "Publisher bound");

        let handle = tokio::spawn(accept_loop(
            listener,
            local.clone(),
            Arc::clone(&self.shared),
        ));
        self.listeners.lock().await.push(handle);

        Ok(local)
    }

    /// Publish a frame to every connected subscriber.
    ///
    /// Returns the number of links the frame was queued on. Zero is not an
    /// error; the frame is simply dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is closed or the frame is too large.
    pub fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let frame = framing::encode_frame(data, self.options.max_frame_size)?;
        Ok(self.shared.sender.send(frame).unwrap_or(0))
    }

    /// Number of subscriber links currently connected.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.shared.links.len()
    }

    /// Remote addresses of the connected subscriber links.
    #[must_use]
    pub fn links(&self) -> Vec<SocketAddr> {
        self.shared.links.iter().map(|l| *l.value()).collect()
    }
}

#[async_trait]
impl Socket for PubSocket {
    fn id(&self) -> SocketId {
        self.lease.id()
    }

    fn kind(&self) -> &'static str {
        "pub"
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(()); // Already closed
        }

        let handles = std::mem::take(&mut *self.listeners.lock().await);
        let mut failure = None;
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    failure = Some(TransportError::Task(e.to_string()));
                }
            }
        }

        self.shared.links.clear();
        self.lease.release();
        debug!(socket = %self.lease.id(), "Publisher closed");

        failure.map_or(Ok(()), Err)
    }

    fn close_now(&self) {
        if !self.closed.send_replace(true) {
            debug!(socket = %self.lease.id(), "Publisher closed without waiting for tasks");
        }
        self.lease.release();
    }
}

/// Accept subscribers until shutdown, running one writer task per link.
async fn accept_loop(listener: TcpListener, local: Endpoint, shared: Arc<PublisherShared>) {
    let mut shutdown = shared.shutdown.clone();
    let mut links = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    let link_id = shared.next_link_id.fetch_add(1, Ordering::Relaxed);
                    shared.links.insert(link_id, addr);
                    debug!(endpoint = %local, link = %addr, "Subscriber connected");

                    let frames = shared.sender.subscribe();
                    links.spawn(write_loop(stream, addr, link_id, frames, Arc::clone(&shared)));
                }
                Err(e) => {
                    warn!(endpoint = %local, error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },

            // Reap finished links
            Some(_) = links.join_next(), if !links.is_empty() => {}
        }
    }

    links.shutdown().await;
    debug!(endpoint = %local, "Publisher listener stopped");
}

/// Forward published frames to one subscriber link.
async fn write_loop(
    stream: TcpStream,
    addr: SocketAddr,
    link_id: u64,
    mut frames: broadcast::Receiver<Bytes>,
    shared: Arc<PublisherShared>,
) {
    let _metrics_guard = LinkMetricsGuard::new(ROLE_PUBLISHER);
    let mut shutdown = shared.shutdown.clone();
    let (mut reader, mut writer) = stream.into_split();
    // Subscribers never send; a read only completes when the link goes away.
    let mut probe = [0u8; 64];

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,

            read = reader.read(&mut probe) => match read {
                Ok(0) | Err(_) => {
                    debug!(link = %addr, "Subscriber disconnected");
                    break;
                }
                Ok(_) => {}
            },

            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        debug!(link = %addr, error = %e, "Subscriber link write failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(link = %addr, skipped, "Subscriber link lagging, frames dropped");
                    metrics::record_dropped(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    shared.links.remove(&link_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let context = Context::new();
        let publisher = context.publisher().unwrap();

        let local = publisher
            .bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
            .await
            .unwrap();
        assert_eq!(local.host(), "127.0.0.1");
        assert_ne!(local.port(), 0);

        publisher.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_links_is_dropped() {
        let context = Context::new();
        let publisher = context.publisher().unwrap();
        assert_eq!(publisher.send(b"nobody listening").unwrap(), 0);
        assert_eq!(publisher.link_count(), 0);
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let context = Context::new();
        let publisher = context.publisher().unwrap();
        publisher.close().await.unwrap();
        publisher.close().await.unwrap();

        assert!(matches!(publisher.send(b"late"), Err(TransportError::Closed)));
        assert!(matches!(
            publisher
                .bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
                .await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_send_too_large() {
        let options = SocketOptions {
            max_frame_size: 4,
            ..Default::default()
        };
        let context = Context::with_options(options);
        let publisher = context.publisher().unwrap();

        assert!(matches!(
            publisher.send(b"too long"),
            Err(TransportError::FrameTooLarge { size: 8, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let context = Context::new();
        let first = context.publisher().unwrap();
        let local = first
            .bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
            .await
            .unwrap();

        let second = context.publisher().unwrap();
        assert!(matches!(second.bind(&local).await, Err(TransportError::Io(_))));
    }
}
