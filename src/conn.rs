//! Connections and the per-bucket connection cache.
//!
//! A connection pairs one local address with one peer address. It is
//! allocated from its bucket's cache and destroyed back into it; no
//! connection outlives its owning bucket. The sender side keeps every
//! in-flight message queued until the peer acknowledges it; the loopback
//! transport acknowledges synchronously, real transports on a control
//! round trip.
use crate::bucket::IpBucket;
use crate::error::{Error, Result};
use crate::transport::Transport;
use addr::{Addr, Namespace};
use bytes::BytesMut;
use crossbeam::atomic::AtomicCell;
use log::trace;
use message::{Message, SequenceNumber};
use slab::Slab;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

/// Default capacity of a bucket's connection cache.
pub const DEFAULT_CONN_CAPACITY: usize = 1024;

/// State of a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnState {
    /// No handshake has completed yet.
    Unconnected,
    /// Ready to carry messages.
    Connected,
}

/// A connection between a local and a peer address.
pub struct Connection {
    laddr: Addr,
    faddr: Addr,
    ns: Namespace,
    weak: Weak<Connection>,
    bucket: Weak<IpBucket>,
    transport: Arc<dyn Transport>,
    state: AtomicCell<ConnState>,
    /// Next sequence number to assign on send.
    next_tx: AtomicCell<SequenceNumber>,
    /// Lowest sequence number still acceptable on receive.
    next_rx: AtomicCell<SequenceNumber>,
    /// Highest sequence number dropped from the retransmit queue.
    acked: AtomicCell<SequenceNumber>,
    retransmit: Mutex<VecDeque<Arc<Message>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("laddr", &self.laddr)
            .field("faddr", &self.faddr)
            .field("ns", &self.ns)
            .field("state", &self.state.load())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        laddr: Addr,
        faddr: Addr,
        ns: Namespace,
        bucket: Weak<IpBucket>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            laddr,
            faddr,
            ns,
            weak: weak.clone(),
            bucket,
            transport,
            state: AtomicCell::new(ConnState::Unconnected),
            next_tx: AtomicCell::new(1),
            next_rx: AtomicCell::new(1),
            acked: AtomicCell::new(0),
            retransmit: Mutex::new(VecDeque::new()),
        })
    }

    /// Returns the owning pointer this connection lives behind.
    fn arc(&self) -> Arc<Connection> {
        self.weak.upgrade().expect("connection is arc backed; qed")
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> Addr {
        self.laddr
    }

    /// Returns the peer address.
    pub fn peer_addr(&self) -> Addr {
        self.faddr
    }

    /// Returns the namespace the connection lives in.
    pub fn namespace(&self) -> Namespace {
        self.ns
    }

    /// Returns the bucket owning the connection, unless the bucket is
    /// already being torn down.
    pub fn bucket(&self) -> Option<Arc<IpBucket>> {
        self.bucket.upgrade()
    }

    /// Returns the transport the connection runs over.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns the connection state.
    pub fn state(&self) -> ConnState {
        self.state.load()
    }

    /// Marks the handshake complete. Called by a transport once the
    /// connection is ready to carry messages.
    pub fn connect_complete(&self) {
        self.state.store(ConnState::Connected);
    }

    /// Initiates the handshake unless the connection is already up.
    pub fn connect_if_down(&self) -> Result<()> {
        if self.state.load() == ConnState::Unconnected {
            self.transport.conn_connect(&self.arc())?;
        }
        Ok(())
    }

    /// Queues a message for retransmission accounting and hands it to the
    /// transport. Returns the number of bytes sent, header included.
    pub fn send(&self, sport: u16, dport: u16, payload: BytesMut) -> Result<usize> {
        if self.state.load() != ConnState::Connected {
            return Err(Error::InvalidArgument);
        }
        let sequence = self.next_tx.fetch_add(1);
        let msg = Arc::new(Message::new(sequence, sport, dport, payload));
        self.retransmit.lock().unwrap().push_back(msg.clone());
        self.transport.xmit(&self.arc(), &msg)
    }

    /// Drops every queued message acknowledged through `sequence`.
    pub fn drop_acked(&self, sequence: SequenceNumber) {
        let mut queue = self.retransmit.lock().unwrap();
        queue.retain(|msg| msg.sequence() > sequence);
        if self.acked.load() < sequence {
            self.acked.store(sequence);
        }
        trace!("{} -> {} acked through {}", self.laddr, self.faddr, sequence);
    }

    /// Returns the highest sequence number acknowledged by the peer.
    pub fn acked(&self) -> SequenceNumber {
        self.acked.load()
    }

    /// Returns the number of messages awaiting acknowledgment.
    pub fn unacked(&self) -> usize {
        self.retransmit.lock().unwrap().len()
    }

    /// Records an arriving sequence number. Returns false for a duplicate
    /// the receive path must drop.
    pub(crate) fn note_rx(&self, sequence: SequenceNumber) -> bool {
        loop {
            let next = self.next_rx.load();
            if sequence < next {
                return false;
            }
            if self.next_rx.compare_and_swap(next, sequence + 1) == next {
                return true;
            }
        }
    }
}

/// Ordered set of a bucket's connections plus their typed allocator.
pub(crate) struct ConnectionCache {
    index: BTreeMap<Addr, usize>,
    conns: Slab<Arc<Connection>>,
}

impl ConnectionCache {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            index: BTreeMap::new(),
            conns: Slab::with_capacity(capacity),
        }
    }

    pub(crate) fn get(&self, faddr: Addr) -> Option<Arc<Connection>> {
        let slot = *self.index.get(&faddr)?;
        self.conns.get(slot).cloned()
    }

    pub(crate) fn insert(&mut self, conn: Arc<Connection>) -> Result<()> {
        if self.conns.len() == self.conns.capacity() {
            return Err(Error::NoMemory);
        }
        let faddr = conn.peer_addr();
        let slot = self.conns.insert(conn);
        self.index.insert(faddr, slot);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.conns.len()
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.index.clear();
        self.conns.drain().collect()
    }
}
