//! Scriptable wire transport for testing purposes.
//!
//! Claims the addresses it is told to own, completes handshakes
//! immediately and records every transmitted frame instead of performing
//! I/O. Tests inspect the recording to verify what would have crossed
//! the wire.
#![deny(missing_docs)]
#![deny(warnings)]
use addr::Addr;
use bytes::BytesMut;
use message::Message;
use rdm::{
    CongestionMap, Connection, Error, IncomingMessage, Result, Transport,
};
use std::sync::{Arc, Mutex};

/// A wire transport that records frames instead of sending them.
pub struct WireTransport {
    owned: Mutex<Vec<Addr>>,
    rejected: Mutex<Vec<Addr>>,
    sent: Mutex<Vec<(Addr, BytesMut)>>,
}

impl WireTransport {
    /// Creates a transport owning no addresses.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            owned: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Claims a local address.
    pub fn own(&self, addr: Addr) {
        self.owned.lock().unwrap().push(addr);
    }

    /// Claims a local address but refuses to serve it.
    pub fn reject(&self, addr: Addr) {
        self.rejected.lock().unwrap().push(addr);
    }

    /// Returns every recorded frame as (peer address, bytes).
    pub fn sent(&self) -> Vec<(Addr, BytesMut)> {
        self.sent.lock().unwrap().clone()
    }

    /// Returns the number of recorded frames.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for WireTransport {
    fn laddr_check(&self, addr: Addr) -> Result<()> {
        if self.rejected.lock().unwrap().contains(&addr) {
            return Err(Error::AddressUnsupported);
        }
        if self.owned.lock().unwrap().contains(&addr) {
            return Ok(());
        }
        Err(Error::AddressUnreachable)
    }

    fn xmit(&self, conn: &Arc<Connection>, msg: &Arc<Message>) -> Result<usize> {
        let frame = msg.to_bytes();
        let len = frame.len();
        self.sent.lock().unwrap().push((conn.peer_addr(), frame));
        Ok(len)
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
