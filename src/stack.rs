//! The messaging stack.
//!
//! Owns the binding directory, the transport registry and the loopback
//! transport. A process constructs one stack explicitly, registers its
//! wire transports, and tears the stack down again by walking and
//! releasing every bucket; nothing here springs into existence behind the
//! caller's back.
use crate::conn::{Connection, DEFAULT_CONN_CAPACITY};
use crate::directory::BindingDirectory;
use crate::error::{Error, Result};
use crate::loopback::LoopbackTransport;
use crate::recv::{deliver_incoming, IncomingMessage};
use crate::sock::{Socket, DEFAULT_INBOX_CAPACITY};
use crate::stats::{Counters, Snapshot};
use crate::transport::{Transport, TransportRegistry};
use addr::{Addr, BindKey, Endpoint, Namespace};
use bytes::BytesMut;
use log::debug;
use std::sync::Arc;

/// Builder for messaging stacks.
#[derive(Clone, Debug)]
pub struct StackBuilder {
    inbox_capacity: usize,
    conn_capacity: usize,
}

impl StackBuilder {
    /// Creates a new `StackBuilder`.
    pub fn new() -> Self {
        Self {
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            conn_capacity: DEFAULT_CONN_CAPACITY,
        }
    }

    /// Number of undelivered messages a socket holds before its port is
    /// marked congested.
    pub fn set_inbox_capacity(mut self, inbox_capacity: usize) -> Self {
        self.inbox_capacity = inbox_capacity;
        self
    }

    /// Number of connections each bucket's cache can allocate.
    pub fn set_conn_capacity(mut self, conn_capacity: usize) -> Self {
        self.conn_capacity = conn_capacity;
        self
    }

    /// Builds the stack.
    pub fn build(self) -> Arc<Stack> {
        let counters = Arc::new(Counters::new());
        let directory = Arc::new(BindingDirectory::new(self.conn_capacity));
        let loopback = Arc::new(LoopbackTransport::new(directory.clone(), counters.clone()));
        Arc::new(Stack {
            transports: TransportRegistry::new(),
            directory,
            loopback,
            counters,
            inbox_capacity: self.inbox_capacity,
        })
    }
}

impl Default for StackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One process-wide messaging stack.
pub struct Stack {
    transports: TransportRegistry,
    directory: Arc<BindingDirectory>,
    loopback: Arc<LoopbackTransport>,
    counters: Arc<Counters>,
    inbox_capacity: usize,
}

impl Stack {
    /// Creates a stack with default tunables.
    pub fn new() -> Arc<Self> {
        StackBuilder::new().build()
    }

    /// Registers a wire transport.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.transports.register(transport);
    }

    /// Returns the binding directory.
    pub fn directory(&self) -> &Arc<BindingDirectory> {
        &self.directory
    }

    /// Returns the loopback transport.
    pub fn loopback(&self) -> &Arc<LoopbackTransport> {
        &self.loopback
    }

    /// Returns a snapshot of the stack's counters.
    pub fn stats(&self) -> Snapshot {
        self.counters.snapshot()
    }

    /// Creates an unbound socket with the stack's inbox capacity.
    pub fn socket(&self) -> Arc<Socket> {
        Socket::with_capacity(self.inbox_capacity)
    }

    /// Binds a socket to a local address within a namespace. `None`
    /// requests an ephemeral port.
    pub fn bind(
        &self,
        sock: &Arc<Socket>,
        addr: Addr,
        ns: Namespace,
        port: Option<u16>,
    ) -> Result<u16> {
        if sock.is_dead() {
            return Err(Error::SocketDead);
        }
        if sock.bound().is_some() {
            return Err(Error::InvalidArgument);
        }
        if addr.is_unspecified() || addr.is_multicast() || addr.is_broadcast() {
            return Err(Error::InvalidArgument);
        }
        let key = BindKey { addr, ns };
        let bucket = self.directory.find_or_create(key, &self.transports)?;
        let port = bucket.bind(sock, port)?;
        self.counters.bind.fetch_add(1);
        debug!("bound {}", Endpoint::new(addr, ns, port));
        Ok(port)
    }

    /// Releases a socket's port. A no-op if the socket is not bound.
    pub fn unbind(&self, sock: &Socket) {
        if let Some(binding) = sock.take_binding() {
            if let Some(bucket) = binding.bucket.upgrade() {
                bucket.unbind(binding.port, sock);
            }
            self.counters.unbind.fetch_add(1);
        }
    }

    /// Begins socket teardown: marks it dead, then releases its port.
    /// The order matters; a concurrent lookup must never hand out a
    /// socket that is mid-teardown.
    pub fn close(&self, sock: &Socket) {
        sock.kill();
        self.unbind(sock);
    }

    /// Finds or creates the connection from a local address to a peer. A
    /// connection to the local address itself runs over the loopback
    /// transport.
    pub fn connection(&self, laddr: Addr, ns: Namespace, faddr: Addr) -> Result<Arc<Connection>> {
        if laddr.is_unspecified() {
            return Err(Error::InvalidArgument);
        }
        if faddr.is_unspecified() {
            return Err(Error::AddressUnreachable);
        }
        let key = BindKey { addr: laddr, ns };
        let bucket = self.directory.find_or_create(key, &self.transports)?;
        let transport: Arc<dyn Transport> = if laddr == faddr {
            self.loopback.clone()
        } else {
            bucket.transport()
        };
        bucket.connection(faddr, transport)
    }

    /// Sends a payload from a bound socket to a destination endpoint.
    /// Returns the number of bytes handed to the transport, header
    /// included.
    pub fn send(&self, sock: &Socket, to: Endpoint, payload: BytesMut) -> Result<usize> {
        let (key, sport) = sock.bound().ok_or(Error::InvalidArgument)?;
        if to.ns != key.ns || to.port == 0 {
            return Err(Error::InvalidArgument);
        }
        let conn = self.connection(key.addr, key.ns, to.addr)?;
        conn.connect_if_down()?;
        let sent = conn.send(sport, to.port, payload)?;
        self.counters.send.fetch_add(1);
        Ok(sent)
    }

    /// Delivers a message arriving on a wire transport. Real transports
    /// call this from their receive completion path.
    pub fn deliver(&self, conn: &Arc<Connection>, saddr: Addr, daddr: Addr, inc: IncomingMessage) {
        deliver_incoming(&self.directory, &self.counters, conn, saddr, daddr, inc);
    }

    /// Tears down every bucket, connection and loopback registration.
    pub fn shutdown(&self) {
        debug!("stack shutting down");
        self.directory.shutdown();
    }
}

