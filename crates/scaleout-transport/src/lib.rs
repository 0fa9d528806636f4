//! # scaleout-transport
//!
//! Publish/subscribe sockets for the scaleout backplane.
//!
//! - **Context** - creates sockets, tracks open ones, terminates them all
//! - **PubSocket** - binds endpoints, fans frames out to connected subscribers
//! - **SubSocket** - connects to publishers, reconnects, filters by prefix
//!
//! Frames travel over TCP with a 4-byte length prefix, so message boundaries
//! survive the trip. Delivery is per-link ordered and best effort: a publisher
//! drops frames for subscribers that are not connected or too far behind.
//!
//! ```rust,ignore
//! use scaleout_transport::{Context, Endpoint, Socket};
//!
//! let context = Context::new();
//! let publisher = context.publisher()?;
//! let local = publisher.bind(&Endpoint::parse("tcp://127.0.0.1:0")?).await?;
//!
//! let subscriber = context.subscriber()?;
//! subscriber.connect(&local).await?;
//! subscriber.subscribe(bytes::Bytes::new());
//!
//! publisher.send(b"hello")?;
//! let frame = subscriber.recv().await?;
//!
//! publisher.close().await?;
//! subscriber.close().await?;
//! context.terminate()?;
//! ```

pub mod context;
pub mod endpoint;
pub mod framing;
pub mod metrics;
pub mod publisher;
pub mod subscriber;
pub mod traits;

pub use context::{Context, SocketOptions};
pub use endpoint::Endpoint;
pub use publisher::PubSocket;
pub use subscriber::SubSocket;
pub use traits::{Socket, SocketId, TransportError};
