//! The receive path.
//!
//! Every arrival funnels through [`deliver_incoming`], whether it came
//! off real hardware or short-circuited through the loopback transport:
//! duplicate suppression against the connection's receive sequence, then
//! a port table lookup, then the inbox enqueue. A delivery that cannot be
//! enqueued is dropped on the floor; datagram semantics make that legal,
//! and the congestion map tells the peer to back off.
use crate::conn::Connection;
use crate::directory::BindingDirectory;
use crate::stats::Counters;
use addr::{Addr, BindKey};
use log::trace;
use message::{Header, Message};
use std::sync::Arc;

/// A delivery in flight: one message reference plus the routing metadata
/// the receive path needs. Dropping the wrapper releases exactly one
/// message reference.
pub struct IncomingMessage {
    conn: Arc<Connection>,
    message: Arc<Message>,
    header: Header,
    saddr: Addr,
}

impl IncomingMessage {
    /// Wraps a message for delivery, taking one extra reference on it and
    /// copying its routing header.
    pub fn new(conn: Arc<Connection>, message: Arc<Message>, saddr: Addr) -> Self {
        let header = *message.header();
        Self {
            conn,
            message,
            header,
            saddr,
        }
    }

    /// Returns the routing header copied at wrap time.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the wrapped message's payload.
    pub fn payload(&self) -> &[u8] {
        self.message.payload()
    }

    /// Returns the wrapped message.
    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    /// Returns the address the delivery originated from.
    pub fn source(&self) -> Addr {
        self.saddr
    }

    /// Returns the connection the delivery arrived on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Drop for IncomingMessage {
    fn drop(&mut self) {
        self.conn.transport().inc_free(self);
    }
}

/// Delivers an arriving message to the socket bound to its destination
/// port. Invoked identically by real transports and the loopback path;
/// undeliverable messages are dropped, never bounced.
pub fn deliver_incoming(
    directory: &BindingDirectory,
    counters: &Counters,
    conn: &Arc<Connection>,
    saddr: Addr,
    daddr: Addr,
    inc: IncomingMessage,
) {
    let header = *inc.header();
    if header.is_cong_update() {
        if let Some(bucket) = conn.bucket() {
            bucket.cong_map().mark_synced();
        }
        counters.cong_updates.fetch_add(1);
        return;
    }
    if !conn.note_rx(header.sequence) {
        trace!("{} -> {} dropping duplicate {}", saddr, daddr, header.sequence);
        counters.recv_drop_dup.fetch_add(1);
        return;
    }
    let key = BindKey {
        addr: daddr,
        ns: conn.namespace(),
    };
    let bucket = match directory.get(key) {
        Some(bucket) => bucket,
        None => {
            counters.recv_drop_unbound.fetch_add(1);
            return;
        }
    };
    let sock = match bucket.find_bound(header.dport) {
        Some(sock) => sock,
        None => {
            trace!("{} port {} not bound, dropping", key, header.dport);
            counters.recv_drop_unbound.fetch_add(1);
            return;
        }
    };
    if sock.enqueue(inc) {
        counters.recv_delivered.fetch_add(1);
    } else {
        trace!("{} port {} inbox full, marking congested", key, header.dport);
        bucket.cong_map().set(header.dport);
        counters.cong_set.fetch_add(1);
    }
}
