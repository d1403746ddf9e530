//! Sockets and their delivery inbox.
//!
//! A socket is owned by the layer above; the messaging core only pins it
//! while it stays bound and hands out clones of that pin on lookup. The
//! `dead` flag is set once, before teardown removes the socket from its
//! port table, so a racing lookup can never return a socket that is about
//! to go away.
use crate::bucket::IpBucket;
use crate::recv::IncomingMessage;
use addr::BindKey;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use crossbeam::atomic::AtomicCell;
use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

/// Default capacity of a socket inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Where a socket is bound. The bucket handle is non-owning; a socket
/// never keeps its bucket alive.
pub(crate) struct Binding {
    pub(crate) key: BindKey,
    pub(crate) port: u16,
    pub(crate) bucket: Weak<IpBucket>,
}

/// A datagram socket.
pub struct Socket {
    inbox: Mutex<VecDeque<IncomingMessage>>,
    capacity: usize,
    dead: AtomicCell<bool>,
    binding: Mutex<Option<Binding>>,
}

impl Socket {
    /// Creates an unbound socket with the default inbox capacity.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    /// Creates an unbound socket holding at most `capacity` undelivered
    /// messages. Deliveries beyond that mark the port congested.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inbox: Mutex::new(VecDeque::new()),
            capacity,
            dead: AtomicCell::new(false),
            binding: Mutex::new(None),
        })
    }

    /// Returns whether the socket began its final teardown.
    pub fn is_dead(&self) -> bool {
        self.dead.load()
    }

    /// Marks the socket dead. Must happen before the socket leaves its
    /// port table; lookups refuse dead sockets.
    pub fn kill(&self) {
        self.dead.store(true);
    }

    /// Returns the key and port the socket is bound to.
    pub fn bound(&self) -> Option<(BindKey, u16)> {
        let binding = self.binding.lock().unwrap();
        binding.as_ref().map(|b| (b.key, b.port))
    }

    /// Returns the bound port.
    pub fn bound_port(&self) -> Option<u16> {
        self.bound().map(|(_, port)| port)
    }

    pub(crate) fn install_binding(&self, binding: Binding) {
        *self.binding.lock().unwrap() = Some(binding);
    }

    pub(crate) fn take_binding(&self) -> Option<Binding> {
        self.binding.lock().unwrap().take()
    }

    /// Queues a delivery. Returns false if the socket is dead or the
    /// inbox is full.
    pub(crate) fn enqueue(&self, inc: IncomingMessage) -> bool {
        if self.dead.load() {
            return false;
        }
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.len() >= self.capacity {
            return false;
        }
        inbox.push_back(inc);
        true
    }

    /// Takes the next delivery off the inbox.
    pub fn try_recv(&self) -> Option<IncomingMessage> {
        let (inc, remaining) = {
            let mut inbox = self.inbox.lock().unwrap();
            let inc = inbox.pop_front()?;
            (inc, inbox.len())
        };
        if remaining * 2 < self.capacity {
            self.uncongest();
        }
        Some(inc)
    }

    /// Resolves when a delivery is available, or to `None` once the
    /// socket is dead and drained.
    pub fn recv(&self) -> RecvFuture {
        RecvFuture(self)
    }

    /// Clears this port's congestion bit once the inbox drained.
    fn uncongest(&self) {
        let binding = self.binding.lock().unwrap();
        if let Some(b) = binding.as_ref() {
            if let Some(bucket) = b.bucket.upgrade() {
                if let Some(map) = bucket.cong_map_if_allocated() {
                    if map.test(b.port) {
                        trace!("{} port {} uncongested", b.key, b.port);
                        map.clear(b.port);
                    }
                }
            }
        }
    }
}

/// Future resolves when a delivery is available on the socket.
pub struct RecvFuture<'a>(&'a Socket);

impl<'a> Future for RecvFuture<'a> {
    type Output = Option<IncomingMessage>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        if let Some(inc) = self.0.try_recv() {
            return Poll::Ready(Some(inc));
        }
        if self.0.is_dead() {
            return Poll::Ready(None);
        }
        cx.waker().clone().wake();
        Poll::Pending
    }
}
