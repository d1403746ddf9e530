//! The capability set a transport presents to the messaging core.
use crate::cong::CongestionMap;
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::recv::IncomingMessage;
use addr::Addr;
use log::trace;
use message::Message;
use std::sync::{Arc, RwLock};

/// Implemented by every transport a connection can run over.
///
/// The core calls these polymorphically; a connection never knows whether
/// its messages cross real hardware or short-circuit through the loopback
/// path.
pub trait Transport: Send + Sync {
    /// Returns `Ok` if this transport owns the candidate local address.
    /// `Err(AddressUnsupported)` claims the address but refuses to serve
    /// it; any other error passes it on to the next transport.
    fn laddr_check(&self, addr: Addr) -> Result<()>;

    /// Transmits a message. Returns the number of bytes handed to the
    /// fabric, header included.
    fn xmit(&self, conn: &Arc<Connection>, msg: &Arc<Message>) -> Result<usize>;

    /// Transmits the connection's local congestion map, starting at
    /// `offset` bytes into the bitmap.
    fn xmit_cong_map(
        &self,
        conn: &Arc<Connection>,
        map: &Arc<CongestionMap>,
        offset: usize,
    ) -> Result<usize>;

    /// Sets up transport private state for a fresh connection.
    fn conn_alloc(&self, conn: &Arc<Connection>) -> Result<()>;

    /// Releases transport private state of a connection.
    fn conn_free(&self, conn: &Connection);

    /// Initiates the connection handshake.
    fn conn_connect(&self, conn: &Arc<Connection>) -> Result<()>;

    /// Tears the connection down.
    fn conn_shutdown(&self, conn: &Connection);

    /// Releases transport private state of a delivery wrapper.
    fn inc_free(&self, inc: &IncomingMessage);
}

/// Registered transports, consulted in registration order when a bucket
/// is created for a local address.
pub struct TransportRegistry {
    transports: RwLock<Vec<Arc<dyn Transport>>>,
}

impl TransportRegistry {
    pub(crate) fn new() -> Self {
        Self {
            transports: RwLock::new(Vec::new()),
        }
    }

    /// Registers a transport.
    pub fn register(&self, transport: Arc<dyn Transport>) {
        self.transports.write().unwrap().push(transport);
    }

    /// Returns the transport owning a local address.
    pub fn for_addr(&self, addr: Addr) -> Result<Arc<dyn Transport>> {
        for transport in self.transports.read().unwrap().iter() {
            match transport.laddr_check(addr) {
                Ok(()) => return Ok(transport.clone()),
                Err(Error::AddressUnsupported) => {
                    trace!("transport refuses {}", addr);
                    return Err(Error::AddressUnsupported);
                }
                Err(_) => {}
            }
        }
        Err(Error::NoTransport)
    }
}
