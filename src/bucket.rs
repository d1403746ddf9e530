//! Per-address resource directory.
//!
//! One bucket exists per bound (address, namespace) pair. It owns the
//! port table, the connection cache and the congestion map for that
//! address, and carries the transport that was resolved for it when the
//! bucket was created.
//!
//! Port slots hold the reference taken at bind time; installing or
//! clearing a slot happens only under the table's write lock, so a lookup
//! under the read lock either sees a fully bound socket or an empty slot,
//! never anything in between.
use crate::cong::CongestionMap;
use crate::conn::{Connection, ConnectionCache};
use crate::error::{Error, Result};
use crate::sock::{Binding, Socket};
use crate::transport::Transport;
use addr::{Addr, BindKey, Namespace};
use log::trace;
use rand::rngs::OsRng;
use rand::Rng;
use std::sync::{Arc, Mutex, RwLock, Weak};

const PORT_SLOTS: usize = 1 << 16;

struct PortTable {
    slots: Box<[Option<Arc<Socket>>]>,
    bound_count: usize,
}

/// Resources of one bound local address.
pub struct IpBucket {
    addr: Addr,
    ns: Namespace,
    weak: Weak<IpBucket>,
    transport: Arc<dyn Transport>,
    ports: RwLock<PortTable>,
    conns: Mutex<ConnectionCache>,
    cong: Mutex<Option<Arc<CongestionMap>>>,
}

impl std::fmt::Debug for IpBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpBucket")
            .field("addr", &self.addr)
            .field("ns", &self.ns)
            .finish()
    }
}

impl IpBucket {
    pub(crate) fn new(
        addr: Addr,
        ns: Namespace,
        transport: Arc<dyn Transport>,
        conn_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            addr,
            ns,
            weak: weak.clone(),
            transport,
            ports: RwLock::new(PortTable {
                slots: vec![None; PORT_SLOTS].into_boxed_slice(),
                bound_count: 0,
            }),
            conns: Mutex::new(ConnectionCache::with_capacity(conn_capacity)),
            cong: Mutex::new(None),
        })
    }

    /// Returns the bucket's local address.
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// Returns the bucket's namespace.
    pub fn namespace(&self) -> Namespace {
        self.ns
    }

    /// Returns the bucket's binding key.
    pub fn key(&self) -> BindKey {
        BindKey {
            addr: self.addr,
            ns: self.ns,
        }
    }

    /// Returns the transport resolved for this address.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Returns the number of bound ports.
    pub fn bound_count(&self) -> usize {
        self.ports.read().unwrap().bound_count
    }

    /// Claims a port for a socket. `None` requests an ephemeral port:
    /// the scan starts at a random rover and walks the port space
    /// circularly, wrapping past zero, until it finds a free slot or
    /// comes back around.
    pub fn bind(&self, sock: &Arc<Socket>, requested: Option<u16>) -> Result<u16> {
        if sock.is_dead() {
            return Err(Error::SocketDead);
        }
        let mut table = self.ports.write().unwrap();
        let port = match requested {
            Some(0) => return Err(Error::InvalidArgument),
            Some(port) => {
                if table.slots[port as usize].is_some() {
                    return Err(Error::AddressInUse);
                }
                port
            }
            None => {
                let start = OsRng.gen::<u16>().max(2);
                let mut rover = start;
                loop {
                    if table.slots[rover as usize].is_none() {
                        break rover;
                    }
                    rover = rover.wrapping_add(1);
                    if rover == 0 {
                        rover = 1;
                    }
                    if rover == start {
                        return Err(Error::AddressInUse);
                    }
                }
            }
        };
        table.slots[port as usize] = Some(sock.clone());
        table.bound_count += 1;
        sock.install_binding(Binding {
            key: self.key(),
            port,
            bucket: self.weak.clone(),
        });
        trace!("{} bound port {}", self.key(), port);
        Ok(port)
    }

    /// Releases a port claimed by `sock`. A slot occupied by a different
    /// socket is left alone.
    pub(crate) fn unbind(&self, port: u16, sock: &Socket) {
        let mut table = self.ports.write().unwrap();
        let occupied = match &table.slots[port as usize] {
            Some(cur) => std::ptr::eq(Arc::as_ptr(cur), sock as *const Socket),
            None => false,
        };
        if occupied {
            table.slots[port as usize] = None;
            table.bound_count -= 1;
            trace!("{} released port {}", self.key(), port);
        }
    }

    /// Looks up the socket bound to a port. Returns `None` for an empty
    /// slot or a socket already in teardown.
    pub fn find_bound(&self, port: u16) -> Option<Arc<Socket>> {
        let table = self.ports.read().unwrap();
        match &table.slots[port as usize] {
            Some(sock) if !sock.is_dead() => Some(sock.clone()),
            _ => None,
        }
    }

    /// Returns the congestion map, allocating it on first use. The
    /// allocation happens off-lock; a racer's spare map is discarded.
    pub fn cong_map(&self) -> Arc<CongestionMap> {
        if let Some(map) = self.cong.lock().unwrap().as_ref() {
            return map.clone();
        }
        let fresh = Arc::new(CongestionMap::new());
        let mut slot = self.cong.lock().unwrap();
        match slot.as_ref() {
            Some(map) => map.clone(),
            None => {
                *slot = Some(fresh.clone());
                fresh
            }
        }
    }

    /// Returns the congestion map only if something already allocated it.
    pub fn cong_map_if_allocated(&self) -> Option<Arc<CongestionMap>> {
        self.cong.lock().unwrap().clone()
    }

    /// Finds or creates the connection to `faddr`, running over
    /// `transport`. A failed creation leaves no trace.
    pub(crate) fn connection(
        &self,
        faddr: Addr,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Connection>> {
        let mut cache = self.conns.lock().unwrap();
        if let Some(conn) = cache.get(faddr) {
            return Ok(conn);
        }
        let conn = Connection::new(
            self.addr,
            faddr,
            self.ns,
            self.weak.clone(),
            transport.clone(),
        );
        transport.conn_alloc(&conn)?;
        if let Err(err) = cache.insert(conn.clone()) {
            transport.conn_free(&conn);
            return Err(err);
        }
        trace!("{} connection to {}", self.key(), faddr);
        Ok(conn)
    }

    /// Returns the number of cached connections.
    pub fn connection_count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    /// Shuts down and frees every connection and clears the port table.
    pub(crate) fn teardown(&self) {
        let conns = self.conns.lock().unwrap().drain();
        for conn in conns {
            conn.transport().conn_shutdown(&conn);
            conn.transport().conn_free(&conn);
        }
        let mut table = self.ports.write().unwrap();
        for slot in table.slots.iter_mut() {
            *slot = None;
        }
        table.bound_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cong::CongestionMap;
    use crate::recv::IncomingMessage;
    use message::Message;
    use std::thread;

    struct NullTransport;

    impl Transport for NullTransport {
        fn laddr_check(&self, _addr: Addr) -> Result<()> {
            Ok(())
        }

        fn xmit(&self, _conn: &Arc<Connection>, msg: &Arc<Message>) -> Result<usize> {
            Ok(message::HEADER_LEN + msg.payload().len())
        }

        fn xmit_cong_map(
            &self,
            _conn: &Arc<Connection>,
            _map: &Arc<CongestionMap>,
            _offset: usize,
        ) -> Result<usize> {
            Ok(message::HEADER_LEN + CongestionMap::BYTES)
        }

        fn conn_alloc(&self, _conn: &Arc<Connection>) -> Result<()> {
            Ok(())
        }

        fn conn_free(&self, _conn: &Connection) {}

        fn conn_connect(&self, conn: &Arc<Connection>) -> Result<()> {
            conn.connect_complete();
            Ok(())
        }

        fn conn_shutdown(&self, _conn: &Connection) {}

        fn inc_free(&self, _inc: &IncomingMessage) {}
    }

    fn bucket() -> Arc<IpBucket> {
        IpBucket::new(
            "10.0.0.5".parse().unwrap(),
            Namespace::DEFAULT,
            Arc::new(NullTransport),
            16,
        )
    }

    #[test]
    fn test_explicit_port_conflict() {
        let bucket = bucket();
        let a = Socket::new();
        let b = Socket::new();
        assert_eq!(bucket.bind(&a, Some(4000)).unwrap(), 4000);
        assert_eq!(bucket.bind(&b, Some(4000)).unwrap_err(), Error::AddressInUse);
        assert_eq!(bucket.bound_count(), 1);
    }

    #[test]
    fn test_port_zero_reserved() {
        let bucket = bucket();
        let sock = Socket::new();
        assert_eq!(
            bucket.bind(&sock, Some(0)).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn test_concurrent_ephemeral_binds() {
        let bucket = bucket();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let bucket = bucket.clone();
            handles.push(thread::spawn(move || {
                let sock = Socket::new();
                bucket.bind(&sock, None).unwrap()
            }));
        }
        let ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_ne!(ports[0], ports[1]);
        assert!(ports.iter().all(|p| *p != 0));
        assert_eq!(bucket.bound_count(), 2);
    }

    #[test]
    fn test_unbind_then_rebind() {
        let bucket = bucket();
        let a = Socket::new();
        bucket.bind(&a, Some(4000)).unwrap();
        let binding = a.take_binding().unwrap();
        bucket.unbind(binding.port, &a);
        assert_eq!(bucket.bound_count(), 0);
        let b = Socket::new();
        assert_eq!(bucket.bind(&b, Some(4000)).unwrap(), 4000);
    }

    #[test]
    fn test_unbind_foreign_socket_is_ignored() {
        let bucket = bucket();
        let a = Socket::new();
        let b = Socket::new();
        bucket.bind(&a, Some(4000)).unwrap();
        bucket.unbind(4000, &b);
        assert_eq!(bucket.bound_count(), 1);
        assert!(bucket.find_bound(4000).is_some());
    }

    #[test]
    fn test_lookup_respects_dead_flag() {
        let bucket = bucket();
        let sock = Socket::new();
        bucket.bind(&sock, Some(4000)).unwrap();
        assert!(bucket.find_bound(4000).is_some());
        // teardown sets the flag before leaving the table
        sock.kill();
        assert!(bucket.find_bound(4000).is_none());
    }

    #[test]
    fn test_dead_socket_cannot_bind() {
        let bucket = bucket();
        let sock = Socket::new();
        sock.kill();
        assert_eq!(bucket.bind(&sock, None).unwrap_err(), Error::SocketDead);
    }

    #[test]
    fn test_cong_map_is_shared() {
        let bucket = bucket();
        assert!(bucket.cong_map_if_allocated().is_none());
        let map = bucket.cong_map();
        assert!(Arc::ptr_eq(&map, &bucket.cong_map()));
        assert!(bucket.cong_map_if_allocated().is_some());
    }

    #[test]
    fn test_connection_reuse() {
        let bucket = bucket();
        let transport = bucket.transport();
        let faddr: Addr = "10.0.0.9".parse().unwrap();
        let a = bucket.connection(faddr, transport.clone()).unwrap();
        let b = bucket.connection(faddr, transport).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(bucket.connection_count(), 1);
    }
}
