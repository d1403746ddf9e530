//! Subsystem counters.
//!
//! Monotonically increasing, updated lock-free from every path. Reading a
//! snapshot is racy by design; the numbers are diagnostics, not state.
use crossbeam::atomic::AtomicCell;

/// Event counters of one messaging stack.
pub struct Counters {
    /// Successful binds.
    pub bind: AtomicCell<u64>,
    /// Unbinds that released a port.
    pub unbind: AtomicCell<u64>,
    /// Messages handed to a transport.
    pub send: AtomicCell<u64>,
    /// Messages short-circuited through the loopback path.
    pub loop_xmit: AtomicCell<u64>,
    /// Deliveries enqueued onto a socket inbox.
    pub recv_delivered: AtomicCell<u64>,
    /// Deliveries dropped as duplicates.
    pub recv_drop_dup: AtomicCell<u64>,
    /// Deliveries dropped because no socket was bound to the port.
    pub recv_drop_unbound: AtomicCell<u64>,
    /// Deliveries dropped against a full inbox, marking the port congested.
    pub cong_set: AtomicCell<u64>,
    /// Congestion map updates received or short-circuited.
    pub cong_updates: AtomicCell<u64>,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self {
            bind: AtomicCell::new(0),
            unbind: AtomicCell::new(0),
            send: AtomicCell::new(0),
            loop_xmit: AtomicCell::new(0),
            recv_delivered: AtomicCell::new(0),
            recv_drop_dup: AtomicCell::new(0),
            recv_drop_unbound: AtomicCell::new(0),
            cong_set: AtomicCell::new(0),
            cong_updates: AtomicCell::new(0),
        }
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            bind: self.bind.load(),
            unbind: self.unbind.load(),
            send: self.send.load(),
            loop_xmit: self.loop_xmit.load(),
            recv_delivered: self.recv_delivered.load(),
            recv_drop_dup: self.recv_drop_dup.load(),
            recv_drop_unbound: self.recv_drop_unbound.load(),
            cong_set: self.cong_set.load(),
            cong_updates: self.cong_updates.load(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    /// Successful binds.
    pub bind: u64,
    /// Unbinds that released a port.
    pub unbind: u64,
    /// Messages handed to a transport.
    pub send: u64,
    /// Messages short-circuited through the loopback path.
    pub loop_xmit: u64,
    /// Deliveries enqueued onto a socket inbox.
    pub recv_delivered: u64,
    /// Deliveries dropped as duplicates.
    pub recv_drop_dup: u64,
    /// Deliveries dropped because no socket was bound to the port.
    pub recv_drop_unbound: u64,
    /// Deliveries dropped against a full inbox.
    pub cong_set: u64,
    /// Congestion map updates received or short-circuited.
    pub cong_updates: u64,
}
