//! The process-wide bucket directory.
//!
//! Root of every lookup: an ordered map from (address, namespace) to the
//! bucket owning that pair's resources. Creation is double-checked so
//! that the speculative bucket construction, which may block for memory,
//! never happens under a lock: look up under the read lock, build the
//! bucket off-lock, then re-check under the write lock and discard the
//! loser of a creation race.
use crate::bucket::IpBucket;
use crate::error::Result;
use crate::transport::TransportRegistry;
use addr::BindKey;
use log::debug;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Ordered map of every bucket in the process.
pub struct BindingDirectory {
    buckets: RwLock<BTreeMap<BindKey, Arc<IpBucket>>>,
    conn_capacity: usize,
}

impl BindingDirectory {
    pub(crate) fn new(conn_capacity: usize) -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            conn_capacity,
        }
    }

    /// Looks up an existing bucket.
    pub fn get(&self, key: BindKey) -> Option<Arc<IpBucket>> {
        self.buckets.read().unwrap().get(&key).cloned()
    }

    /// Returns the number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.read().unwrap().len()
    }

    /// Returns whether the directory holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bucket for a key, creating it if this is the first
    /// binding of the pair. Exactly one bucket ever becomes visible per
    /// key, no matter how many callers race here.
    pub fn find_or_create(
        &self,
        key: BindKey,
        transports: &TransportRegistry,
    ) -> Result<Arc<IpBucket>> {
        if let Some(bucket) = self.buckets.read().unwrap().get(&key) {
            return Ok(bucket.clone());
        }
        let transport = transports.for_addr(key.addr)?;
        // Speculative; may lose the race below and be dropped whole.
        let fresh = IpBucket::new(key.addr, key.ns, transport, self.conn_capacity);
        let mut buckets = self.buckets.write().unwrap();
        if let Some(winner) = buckets.get(&key) {
            return Ok(winner.clone());
        }
        buckets.insert(key, fresh.clone());
        debug!("created bucket {}", key);
        Ok(fresh)
    }

    /// Tears down every bucket and empties the directory.
    pub(crate) fn shutdown(&self) {
        let buckets = std::mem::replace(&mut *self.buckets.write().unwrap(), BTreeMap::new());
        for (key, bucket) in buckets {
            debug!("releasing bucket {}", key);
            bucket.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cong::CongestionMap;
    use crate::conn::Connection;
    use crate::error::Error;
    use crate::recv::IncomingMessage;
    use crate::transport::Transport;
    use addr::{Addr, Namespace};
    use message::Message;
    use std::thread;

    struct SubnetTransport {
        owned: Vec<Addr>,
        rejected: Vec<Addr>,
    }

    impl Transport for SubnetTransport {
        fn laddr_check(&self, addr: Addr) -> Result<()> {
            if self.rejected.contains(&addr) {
                return Err(Error::AddressUnsupported);
            }
            if self.owned.contains(&addr) {
                return Ok(());
            }
            Err(Error::AddressUnreachable)
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

    fn registry() -> TransportRegistry {
        let registry = TransportRegistry::new();
        registry.register(Arc::new(SubnetTransport {
            owned: vec!["10.0.0.5".parse().unwrap()],
            rejected: vec!["10.0.0.66".parse().unwrap()],
        }));
        registry
    }

    fn key(addr: &str) -> BindKey {
        BindKey {
            addr: addr.parse().unwrap(),
            ns: Namespace::DEFAULT,
        }
    }

    #[test]
    fn test_selection_errors() {
        let directory = BindingDirectory::new(16);
        let registry = registry();
        assert_eq!(
            directory
                .find_or_create(key("192.168.1.1"), &registry)
                .unwrap_err(),
            Error::NoTransport
        );
        assert_eq!(
            directory
                .find_or_create(key("10.0.0.66"), &registry)
                .unwrap_err(),
            Error::AddressUnsupported
        );
        assert!(directory.is_empty());
    }

    #[test]
    fn test_create_is_idempotent() {
        let directory = BindingDirectory::new(16);
        let registry = registry();
        let a = directory.find_or_create(key("10.0.0.5"), &registry).unwrap();
        let b = directory.find_or_create(key("10.0.0.5"), &registry).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_concurrent_create_single_winner() {
        let directory = Arc::new(BindingDirectory::new(16));
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let directory = directory.clone();
            let registry = registry.clone();
            handles.push(thread::spawn(move || {
                directory.find_or_create(key("10.0.0.5"), &registry).unwrap()
            }));
        }
        let buckets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for bucket in &buckets[1..] {
            assert!(Arc::ptr_eq(&buckets[0], bucket));
        }
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let directory = BindingDirectory::new(16);
        let registry = registry();
        let a = directory.find_or_create(key("10.0.0.5"), &registry).unwrap();
        let b = directory
            .find_or_create(
                BindKey {
                    addr: "10.0.0.5".parse().unwrap(),
                    ns: Namespace(7),
                },
                &registry,
            )
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_shutdown_releases_buckets() {
        let directory = BindingDirectory::new(16);
        let registry = registry();
        let bucket = directory.find_or_create(key("10.0.0.5"), &registry).unwrap();
        let transport = bucket.transport();
        bucket
            .connection("10.0.0.9".parse().unwrap(), transport)
            .unwrap();
        directory.shutdown();
        assert!(directory.is_empty());
        assert_eq!(bucket.connection_count(), 0);
    }
}
