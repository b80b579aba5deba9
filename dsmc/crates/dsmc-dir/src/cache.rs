//! Object storage
//!
//! Two places hold objects on a host:
//! - [`ObjectStore`]: the home copies of objects this host owns
//! - [`LocalCache`]: copies of remote objects fetched through the directory
//!
//! Both hand out [`ObjectCell`]s. The cell lock is the ordinary object lock
//! of the runtime: application code holds it while using the object and the
//! directories only ever `try_lock` it, so a transfer never races a local use.

use std::any::Any;
use std::sync::Arc;

use dsmc_util::{FxHashMap, Handle, HostId, SlotAllocator};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::typeops::TypeOps;

/// A type-erased object behind the runtime's object lock.
pub struct ObjectCell {
    value: Mutex<Box<dyn Any + Send>>,
}

impl ObjectCell {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self::from_boxed(Box::new(value))
    }

    pub fn from_boxed(value: Box<dyn Any + Send>) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Any + Send>> {
        self.value.lock()
    }

    /// Lock without waiting; `None` means a local use is in progress.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Box<dyn Any + Send>>> {
        self.value.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.value.is_locked()
    }

    /// Run `f` on the value if it is a `T`.
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.value.lock();
        guard.downcast_mut::<T>().map(f)
    }

    pub fn snapshot<T: Clone + 'static>(&self) -> Option<T> {
        self.value.lock().downcast_ref::<T>().cloned()
    }
}

impl std::fmt::Debug for ObjectCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCell")
            .field("locked", &self.is_locked())
            .finish()
    }
}

struct CacheEntry {
    cell: Arc<ObjectCell>,
    writable: bool,
}

/// Cached copies of remote objects, at most one per handle.
#[derive(Default)]
pub struct LocalCache {
    entries: Mutex<FxHashMap<Handle, CacheEntry>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The local copy if it is usable for the wanted access.
    pub fn resolve(&self, handle: Handle, want_rw: bool) -> Option<Arc<ObjectCell>> {
        let entries = self.entries.lock();
        let entry = entries.get(&handle)?;
        if want_rw && !entry.writable {
            return None;
        }
        Some(entry.cell.clone())
    }

    /// Install a copy, replacing any previous one.
    pub fn create(&self, handle: Handle, writable: bool, value: Box<dyn Any + Send>) {
        let entry = CacheEntry {
            cell: Arc::new(ObjectCell::from_boxed(value)),
            writable,
        };
        self.entries.lock().insert(handle, entry);
    }

    pub fn evict(&self, handle: Handle) -> Option<Arc<ObjectCell>> {
        self.entries.lock().remove(&handle).map(|entry| entry.cell)
    }

    /// Promote a read-only copy in place. Returns false if absent.
    pub fn make_rw(&self, handle: Handle) -> bool {
        self.set_writable(handle, true)
    }

    /// Demote a writable copy in place. Returns false if absent.
    pub fn make_ro(&self, handle: Handle) -> bool {
        self.set_writable(handle, false)
    }

    fn set_writable(&self, handle: Handle, writable: bool) -> bool {
        match self.entries.lock().get_mut(&handle) {
            Some(entry) => {
                entry.writable = writable;
                true
            },
            None => false,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.lock().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Home copy of an owned object and its dispatch record.
#[derive(Clone)]
pub struct HomeObject {
    pub cell: Arc<ObjectCell>,
    pub ops: &'static TypeOps,
}

/// Objects owned by this host.
pub struct ObjectStore {
    slots: SlotAllocator,
    objects: RwLock<FxHashMap<u64, HomeObject>>,
}

impl ObjectStore {
    pub fn new(host: HostId) -> Self {
        Self {
            slots: SlotAllocator::new(host),
            objects: RwLock::new(FxHashMap::default()),
        }
    }

    /// Store `value` and mint the handle that names it cluster-wide.
    pub fn allocate<T: Send + 'static>(&self, value: T, ops: &'static TypeOps) -> Handle {
        let handle = self.slots.next();
        let home = HomeObject {
            cell: Arc::new(ObjectCell::new(value)),
            ops,
        };
        self.objects.write().insert(handle.slot(), home);
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<HomeObject> {
        if handle.host() != self.slots.host() {
            return None;
        }
        self.objects.read().get(&handle.slot()).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_try_lock_fails_while_used() {
        let cell = ObjectCell::new(5u32);
        let guard = cell.lock();
        assert!(cell.try_lock().is_none());
        assert!(cell.is_locked());
        drop(guard);
        assert!(cell.try_lock().is_some());
    }

    #[test]
    fn test_cell_with_and_snapshot() {
        let cell = ObjectCell::new(vec![1u8, 2]);
        cell.with(|v: &mut Vec<u8>| v.push(3));
        assert_eq!(cell.snapshot::<Vec<u8>>(), Some(vec![1, 2, 3]));
        assert_eq!(cell.snapshot::<String>(), None);
    }

    #[test]
    fn test_cache_resolve_respects_mode() {
        let cache = LocalCache::new();
        let h = Handle::new(HostId(1), 1);
        cache.create(h, false, Box::new(1u32));

        assert!(cache.resolve(h, false).is_some());
        assert!(cache.resolve(h, true).is_none());

        assert!(cache.make_rw(h));
        assert!(cache.resolve(h, true).is_some());
        assert!(cache.make_ro(h));
        assert!(cache.resolve(h, true).is_none());

        assert!(cache.evict(h).is_some());
        assert!(cache.is_empty());
        assert!(!cache.make_rw(h));
    }

    #[test]
    fn test_store_allocates_owned_handles() {
        let store = ObjectStore::new(HostId(2));
        let ops = TypeOps::of::<String>();
        let a = store.allocate("a".to_string(), ops);
        let b = store.allocate("b".to_string(), ops);

        assert_ne!(a, b);
        assert_eq!(a.host(), HostId(2));
        assert_eq!(store.len(), 2);
        let home = store.get(b).unwrap();
        assert_eq!(home.cell.snapshot::<String>().as_deref(), Some("b"));
        assert!(store.get(a.with_host(HostId(3))).is_none());
    }
}
