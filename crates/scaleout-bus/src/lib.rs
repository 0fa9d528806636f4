//! # scaleout-bus
//!
//! Scaleout message bus for a farm of realtime servers.
//!
//! Each node runs one [`ScaleoutBus`]. A batch sent on any node reaches the
//! host on every node, the sender included:
//!
//! - **ScaleoutBus** - publishes local batches, receives peers' batches
//! - **Dispatcher** - decodes envelopes and hands batches to the host
//! - **ScaleoutConfig** - listen address, peer list, transport tuning
//! - **ScaleoutHost** / **MessageBus** - the contracts with the hosting server
//!
//! ## Architecture
//!
//! ```text
//!             send()                          peers' publishers
//!               │                                     │
//!               ▼                                     ▼
//!        ┌─────────────┐   tcp   ┌──────┐    ┌──────────────┐
//!        │  PubSocket  │───────▶│ peer │    │ SubSocket ×N │
//!        └─────────────┘         └──────┘    └──────────────┘
//!               │ self-delivery                      │ receive loop per peer
//!               ▼                                     ▼
//!        ┌──────────────────────────────────────────────────┐
//!        │        Dispatcher ──▶ ScaleoutHost::on_received   │
//!        └──────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-most-once. Batches from one node arrive everywhere in that
//! node's send order; batches from different nodes may interleave.

pub mod bus;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod metrics;

pub use bus::{ScaleoutBus, TRACE_SINK_NAME};
pub use config::{ConfigError, ScaleoutConfig, ScaleoutSettings, TransportSettings};
pub use diagnostics::TraceSink;
pub use dispatch::Dispatcher;
pub use error::BusError;
pub use host::{
    DependencyResolver, MessageBus, ScaleoutHost, StreamIndex, TracingResolver, STREAM_COUNT,
    STREAM_INDEX,
};
pub use lifecycle::{DisposeError, DisposeReport};

pub use scaleout_protocol::ScaleoutMessage;
