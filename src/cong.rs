//! Per-address backpressure state.
//!
//! One congestion map exists per bound local address, allocated the first
//! time anything asks for it and shared by every connection terminating
//! there. A set bit means the port's inbox overflowed and peers should
//! hold off; clearing happens when the inbox drains. Peers learn of
//! changes through congestion update messages; the map tracks whether the
//! last change has been pushed out yet.
use crossbeam::atomic::AtomicCell;
use std::sync::Mutex;

const WORDS: usize = 1 << 10;

/// Bitmap of per-port backpressure state.
pub struct CongestionMap {
    bits: Mutex<Box<[u64]>>,
    synced: AtomicCell<bool>,
}

impl CongestionMap {
    /// Size of the bitmap on the wire in bytes.
    pub const BYTES: usize = WORDS * 8;

    /// Creates an all-clear map.
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(vec![0; WORDS].into_boxed_slice()),
            synced: AtomicCell::new(true),
        }
    }

    /// Marks a port congested.
    pub fn set(&self, port: u16) {
        let mut bits = self.bits.lock().unwrap();
        bits[port as usize / 64] |= 1u64 << (port % 64);
        self.synced.store(false);
    }

    /// Clears a port's congestion bit.
    pub fn clear(&self, port: u16) {
        let mut bits = self.bits.lock().unwrap();
        bits[port as usize / 64] &= !(1u64 << (port % 64));
        self.synced.store(false);
    }

    /// Returns whether a port is marked congested.
    pub fn test(&self, port: u16) -> bool {
        let bits = self.bits.lock().unwrap();
        bits[port as usize / 64] & 1u64 << (port % 64) != 0
    }

    /// Marks the peer's view of the map as fully up to date.
    pub fn mark_synced(&self) {
        self.synced.store(true);
    }

    /// Returns whether the peer's view of the map is up to date.
    pub fn is_synced(&self) -> bool {
        self.synced.load()
    }
}

impl Default for CongestionMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits() {
        let map = CongestionMap::new();
        assert!(!map.test(4000));
        map.set(4000);
        assert!(map.test(4000));
        assert!(!map.test(4001));
        map.clear(4000);
        assert!(!map.test(4000));
        // ports sharing a word stay independent
        map.set(0);
        map.set(63);
        assert!(map.test(0) && map.test(63));
        map.clear(0);
        assert!(!map.test(0) && map.test(63));
    }

    #[test]
    fn test_synced() {
        let map = CongestionMap::new();
        assert!(map.is_synced());
        map.set(80);
        assert!(!map.is_synced());
        map.mark_synced();
        assert!(map.is_synced());
        map.clear(80);
        assert!(!map.is_synced());
    }
}
