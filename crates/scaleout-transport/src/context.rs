//! Transport context.
//!
//! A [`Context`] is created once and hands out every socket. It tracks how
//! many sockets are open and owns a shutdown signal that all socket tasks
//! observe, so terminating the context stops whatever is still running.
//! Terminate it only after its sockets are closed.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::framing::MAX_FRAME_SIZE;
use crate::publisher::PubSocket;
use crate::subscriber::SubSocket;
use crate::traits::{SocketId, TransportError};

/// Socket tuning shared by every socket of a context.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Delay between subscriber reconnect attempts.
    pub reconnect_interval: Duration,
    /// Frames buffered per subscriber link before a slow link drops frames.
    pub send_high_water_mark: usize,
    /// Frames buffered by a subscriber socket before reads apply backpressure.
    pub receive_high_water_mark: usize,
    /// Largest frame accepted on send or receive.
    pub max_frame_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(1000),
            send_high_water_mark: 1024,
            receive_high_water_mark: 1024,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

struct ContextInner {
    options: SocketOptions,
    shutdown: watch::Sender<bool>,
    open_sockets: AtomicUsize,
    next_socket_id: AtomicU64,
    terminated: AtomicBool,
}

/// The socket runtime that every socket is created from.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context with default socket options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SocketOptions::default())
    }

    /// Create a context with custom socket options.
    #[must_use]
    pub fn with_options(options: SocketOptions) -> Self {
        debug!(?options, "Creating transport context");
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                options,
                shutdown,
                open_sockets: AtomicUsize::new(0),
                next_socket_id: AtomicU64::new(1),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Get the socket options.
    #[must_use]
    pub fn options(&self) -> &SocketOptions {
        &self.inner.options
    }

    /// Number of sockets created from this context and not yet closed.
    #[must_use]
    pub fn open_sockets(&self) -> usize {
        self.inner.open_sockets.load(Ordering::SeqCst)
    }

    /// Check if the context has been terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Create a publisher socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the context has been terminated.
    pub fn publisher(&self) -> Result<PubSocket, TransportError> {
        Ok(PubSocket::new(self.lease()?, self.inner.options.clone()))
    }

    /// Create a subscriber socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the context has been terminated.
    pub fn subscriber(&self) -> Result<SubSocket, TransportError> {
        Ok(SubSocket::new(self.lease()?, self.inner.options.clone()))
    }

    /// Terminate the context, stopping every socket task still running.
    ///
    /// Terminating twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SocketsStillOpen`] if sockets were not closed
    /// first. The context is terminated regardless.
    pub fn terminate(&self) -> Result<(), TransportError> {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.shutdown.send_replace(true);

        let open = self.open_sockets();
        if open > 0 {
            warn!(open_sockets = open, "Transport context terminated with open sockets");
            return Err(TransportError::SocketsStillOpen(open));
        }

        info!("Transport context terminated");
        Ok(())
    }

    fn lease(&self) -> Result<SocketLease, TransportError> {
        if self.is_terminated() {
            return Err(TransportError::ContextTerminated);
        }

        self.inner.open_sockets.fetch_add(1, Ordering::SeqCst);
        let id = SocketId(self.inner.next_socket_id.fetch_add(1, Ordering::Relaxed));

        Ok(SocketLease {
            context: Arc::clone(&self.inner),
            id,
            released: AtomicBool::new(false),
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// A socket's registration with its context.
///
/// Released exactly once, on close or on drop.
pub(crate) struct SocketLease {
    context: Arc<ContextInner>,
    id: SocketId,
    released: AtomicBool,
}

impl SocketLease {
    pub(crate) fn id(&self) -> SocketId {
        self.id
    }

    /// Build the shutdown signal a socket's tasks listen on.
    pub(crate) fn signal(&self, closed: &watch::Sender<bool>) -> ShutdownSignal {
        ShutdownSignal {
            socket: closed.subscribe(),
            context: self.context.shutdown.subscribe(),
        }
    }

    pub(crate) fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.context.open_sockets.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fires when either the socket is closed or its context is terminated.
#[derive(Clone)]
pub(crate) struct ShutdownSignal {
    socket: watch::Receiver<bool>,
    context: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub(crate) fn is_set(&self) -> bool {
        *self.socket.borrow() || *self.context.borrow()
    }

    /// Wait until shutdown. A dropped sender counts as shutdown.
    pub(crate) async fn wait(&mut self) {
        tokio::select! {
            _ = self.socket.wait_for(|closed| *closed) => {}
            _ = self.context.wait_for(|terminated| *terminated) => {}
        }
    }
}
