use std::sync::atomic::{AtomicU64, Ordering};

use crate::handle::{Handle, HostId};

/// Generator for handles owned by one host
///
/// Slots start at 1 so that a zeroed handle never aliases a live object.
pub struct SlotAllocator {
    host: HostId,
    counter: AtomicU64,
}

impl SlotAllocator {
    /// Create a new allocator for objects owned by `host`
    pub fn new(host: HostId) -> Self {
        Self {
            host,
            counter: AtomicU64::new(1),
        }
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    /// Generate a new unique handle
    pub fn next(&self) -> Handle {
        let slot = self.counter.fetch_add(1, Ordering::SeqCst);
        if slot == u64::MAX {
            panic!("Slot overflow! Host {} exhausted its handle space.", self.host);
        }
        Handle::new(self.host, slot)
    }

    /// Number of handles handed out so far
    pub fn allocated(&self) -> u64 {
        self.counter.load(Ordering::SeqCst) - 1
    }
}
