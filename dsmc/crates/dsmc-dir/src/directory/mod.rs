//! Coherence directories
//!
//! Every host runs both halves of the protocol:
//! - [`OwnerDirectory`] for handles it owns: the single source of truth for
//!   who may read or write, and the place where contention is arbitrated
//! - [`RequesterDirectory`] for everyone else's handles: a per-handle state
//!   machine driving the local copy towards the access the application wants
//!
//! # Locking
//!
//! Each handle's metadata sits behind its own lock. The table that maps
//! handles to metadata has a separate lock held only for lookup, insertion
//! and erasure, never across a state transition. Callbacks collected during
//! a transition run after every lock is released.

mod owner;
mod requester;

pub use owner::{OwnerDirectory, OwnerSnapshot};
pub use requester::{Outstanding, RemoteState, RequesterDirectory};

use std::sync::Arc;

use dsmc_util::{FxHashMap, Handle, HostId, ResolveMode};
use parking_lot::Mutex;

use crate::config::DirConfig;
use crate::logging::{DirEvent, DirLogger};
use crate::net::Transport;
use crate::stats::DirStats;
use crate::error::Result;
use crate::typeops::TypeOps;

/// Callback run once a handle reaches a wanted state.
pub type Callback = Box<dyn FnOnce(Handle) + Send>;

pub(crate) struct Waiter {
    pub mode: ResolveMode,
    pub callback: Callback,
}

/// Metadata entries that can be dropped once nothing refers to them.
pub(crate) trait Reclaim {
    fn is_reclaimable(&self) -> bool;
}

struct Slot<E> {
    dead: bool,
    md: E,
}

/// Handle to per-entry-locked metadata.
pub(crate) struct MetaTable<E> {
    entries: Mutex<FxHashMap<Handle, Arc<Mutex<Slot<E>>>>>,
}

impl<E: Default + Reclaim> MetaTable<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Run `f` on the entry for `handle` with its lock held.
    ///
    /// Returns `None` without calling `f` if there is no entry and `create`
    /// is false. An entry left reclaimable by `f` is erased before the lock
    /// is released.
    pub fn with<R>(&self, handle: Handle, create: bool, f: impl FnOnce(&mut E) -> R) -> Option<R> {
        let mut f = Some(f);
        loop {
            let slot = {
                let mut entries = self.entries.lock();
                match entries.get(&handle) {
                    Some(slot) => slot.clone(),
                    None if create => {
                        let slot = Arc::new(Mutex::new(Slot {
                            dead: false,
                            md: E::default(),
                        }));
                        entries.insert(handle, slot.clone());
                        slot
                    },
                    None => return None,
                }
            };

            let mut guard = slot.lock();
            if guard.dead {
                // Erased between lookup and lock; look again.
                continue;
            }
            let f = f.take()?;
            let result = f(&mut guard.md);
            if guard.md.is_reclaimable() {
                guard.dead = true;
                self.entries.lock().remove(&handle);
            }
            return Some(result);
        }
    }

    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.entries.lock().keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Pull out the waiters satisfied by the current state.
pub(crate) fn take_satisfied(
    waiters: &mut Vec<Waiter>,
    satisfied: impl Fn(ResolveMode) -> bool,
) -> Vec<Callback> {
    let mut fired = Vec::new();
    let mut index = 0;
    while index < waiters.len() {
        if satisfied(waiters[index].mode) {
            fired.push(waiters.remove(index).callback);
        } else {
            index += 1;
        }
    }
    fired
}

/// State shared by both directories of a host.
pub struct DirContext {
    pub me: HostId,
    pub transport: Arc<dyn Transport>,
    pub config: DirConfig,
    pub stats: Arc<DirStats>,
    pub logger: Arc<DirLogger>,
}

impl DirContext {
    pub(crate) fn log(&self, event: DirEvent) {
        self.logger.log(event);
    }

    /// Send a request (fetch, recall, invalidation or release) to `dest`.
    pub(crate) fn send_request(
        &self,
        ops: &TypeOps,
        dest: HostId,
        handle: Handle,
        whom: HostId,
        mode: ResolveMode,
    ) -> Result<()> {
        ops.request(self.transport.as_ref(), dest, handle, whom, mode)?;
        if self.config.stats_enabled {
            self.stats.record_request_sent();
        }
        self.log(DirEvent::RequestSent {
            handle,
            dest,
            whom,
            mode,
        });
        Ok(())
    }

    /// Send object bytes (possibly none) to `dest`.
    pub(crate) fn send_object(
        &self,
        ops: &TypeOps,
        dest: HostId,
        handle: Handle,
        bytes: Vec<u8>,
        mode: ResolveMode,
    ) -> Result<()> {
        let size = bytes.len();
        ops.send_bytes(self.transport.as_ref(), dest, handle, bytes, mode)?;
        if self.config.stats_enabled {
            self.stats.record_object_sent();
        }
        self.log(DirEvent::ObjectSent {
            handle,
            dest,
            mode,
            bytes: size,
        });
        Ok(())
    }

    pub(crate) fn count(&self, record: impl FnOnce(&DirStats)) {
        if self.config.stats_enabled {
            record(&self.stats);
        }
    }

    pub(crate) fn deferred(&self, handle: Handle, reason: &str) {
        self.log(DirEvent::Deferred {
            handle,
            reason: reason.to_string(),
        });
    }

    /// Run callbacks outside every directory lock.
    pub(crate) fn fire(&self, handle: Handle, callbacks: Vec<Callback>) {
        if callbacks.is_empty() {
            return;
        }
        self.count(|stats| stats.record_notifications(callbacks.len()));
        self.log(DirEvent::Notified {
            handle,
            waiters: callbacks.len(),
        });
        for callback in callbacks {
            callback(handle);
        }
    }
}

/// Context for a directory under test, plus every endpoint of its network.
#[cfg(test)]
pub(crate) fn test_context(
    me: HostId,
    num_hosts: u32,
) -> (Arc<DirContext>, Vec<Arc<crate::net::LoopbackEndpoint>>) {
    let net = crate::net::LoopbackNetwork::build(num_hosts);
    let ctx = Arc::new(DirContext {
        me,
        transport: net[me.0 as usize].clone(),
        config: DirConfig::default(),
        stats: Arc::new(DirStats::new()),
        logger: Arc::new(DirLogger::new(me, Default::default())),
    });
    (ctx, net)
}
