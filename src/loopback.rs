//! The loopback transport.
//!
//! Selected at connection setup when a connection's peer address equals
//! its local address. Instead of issuing I/O, a transmit wraps the
//! message and calls straight into the receive path, then acknowledges
//! its own sequence number: delivery is unconditional and synchronous, so
//! there is no round trip to wait for. Nothing here can fail for network
//! reasons.
use crate::cong::CongestionMap;
use crate::conn::Connection;
use crate::directory::BindingDirectory;
use crate::error::{Error, Result};
use crate::recv::{deliver_incoming, IncomingMessage};
use crate::stats::Counters;
use crate::transport::Transport;
use addr::Addr;
use log::trace;
use message::{Message, HEADER_LEN};
use std::sync::{Arc, Mutex, Weak};

/// Transport that delivers messages directly into the receive path.
pub struct LoopbackTransport {
    directory: Arc<BindingDirectory>,
    counters: Arc<Counters>,
    /// Every live loopback connection, so teardown can enumerate them.
    conns: Mutex<Vec<Weak<Connection>>>,
}

impl LoopbackTransport {
    pub(crate) fn new(directory: Arc<BindingDirectory>, counters: Arc<Counters>) -> Self {
        Self {
            directory,
            counters,
            conns: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of live loopback connections.
    pub fn connection_count(&self) -> usize {
        let mut conns = self.conns.lock().unwrap();
        conns.retain(|conn| conn.upgrade().is_some());
        conns.len()
    }
}

impl Transport for LoopbackTransport {
    /// The loopback transport is chosen by connection setup, never by
    /// address; it claims nothing.
    fn laddr_check(&self, _addr: Addr) -> Result<()> {
        Err(Error::AddressUnreachable)
    }

    fn xmit(&self, conn: &Arc<Connection>, msg: &Arc<Message>) -> Result<usize> {
        if msg.is_cong_update() {
            let bucket = conn.bucket().ok_or(Error::InvalidArgument)?;
            let map = bucket.cong_map();
            return self.xmit_cong_map(conn, &map, 0);
        }
        let inc = IncomingMessage::new(conn.clone(), msg.clone(), conn.local_addr());
        // The sender's local address is the delivery's source; its peer
        // address, equal by definition, is the destination.
        deliver_incoming(
            &self.directory,
            &self.counters,
            conn,
            conn.local_addr(),
            conn.peer_addr(),
            inc,
        );
        // Delivered already, so the send is acknowledged before xmit
        // returns.
        conn.drop_acked(msg.sequence());
        self.counters.loop_xmit.fetch_add(1);
        Ok(HEADER_LEN + msg.payload().len())
    }

    fn xmit_cong_map(
        &self,
        conn: &Arc<Connection>,
        map: &Arc<CongestionMap>,
        offset: usize,
    ) -> Result<usize> {
        assert_eq!(offset, 0);
        let bucket = conn.bucket().ok_or(Error::InvalidArgument)?;
        assert!(Arc::ptr_eq(map, &bucket.cong_map()));
        map.mark_synced();
        self.counters.cong_updates.fetch_add(1);
        Ok(HEADER_LEN + CongestionMap::BYTES)
    }

    fn conn_alloc(&self, conn: &Arc<Connection>) -> Result<()> {
        trace!("loopback connection at {}", conn.local_addr());
        self.conns.lock().unwrap().push(Arc::downgrade(conn));
        Ok(())
    }

    fn conn_free(&self, conn: &Connection) {
        let mut conns = self.conns.lock().unwrap();
        conns.retain(|w| !std::ptr::eq(w.as_ptr(), conn as *const Connection));
    }

    fn conn_connect(&self, conn: &Arc<Connection>) -> Result<()> {
        // No handshake; complete synchronously.
        conn.connect_complete();
        Ok(())
    }

    fn conn_shutdown(&self, _conn: &Connection) {}

    fn inc_free(&self, _inc: &IncomingMessage) {}
}
