//! # Reliable datagram messaging core
//! Binding directory and loopback delivery path of a datagram messaging
//! subsystem running over connection-oriented transports. Processes bind
//! (address, port) endpoints inside a namespace; arriving messages are
//! routed by looking the endpoint up again; when sender and receiver
//! resolve to the same host the loopback transport delivers directly
//! between them without touching hardware.
//!
//! ## Binding
//! The root of every lookup is the binding directory, an ordered map from
//! (address, namespace) to a bucket owning that pair's port table,
//! connection cache and congestion map. Buckets are created on first
//! bind with double-checked locking so a blocking allocation never
//! happens under a lock, and live until the stack shuts down.
//!
//! ## Transports
//! Every connection runs over an implementation of the `Transport`
//! capability set. Wire transports register with the stack and claim
//! local addresses; the loopback transport is chosen directly by
//! connection setup whenever a connection's peer address equals its local
//! address, and turns transmits into synchronous calls of the receive
//! path.
//!
//! ## Reliability
//! Senders keep each message queued until the peer acknowledges its
//! sequence number; receivers drop duplicates against the connection's
//! receive sequence. The loopback path acknowledges before the transmit
//! returns, since delivery cannot fail. Retransmission timers belong to
//! the wire transports and do not appear here.
//!
//! ## Backpressure
//! Each bound address carries a lazily allocated bitmap of congested
//! ports, shared by every connection terminating there. An inbox
//! overflow sets the destination port's bit; draining the inbox clears
//! it; congestion update messages keep the peer's view in sync.
mod bucket;
mod cong;
mod conn;
mod directory;
mod error;
mod loopback;
mod recv;
mod sock;
mod stack;
mod stats;
mod transport;

pub use crate::bucket::IpBucket;
pub use crate::cong::CongestionMap;
pub use crate::conn::{ConnState, Connection, DEFAULT_CONN_CAPACITY};
pub use crate::directory::BindingDirectory;
pub use crate::error::{Error, Result};
pub use crate::loopback::LoopbackTransport;
pub use crate::recv::{deliver_incoming, IncomingMessage};
pub use crate::sock::{RecvFuture, Socket, DEFAULT_INBOX_CAPACITY};
pub use crate::stack::{Stack, StackBuilder};
pub use crate::stats::{Counters, Snapshot};
pub use crate::transport::{Transport, TransportRegistry};
