//! Host runtime
//!
//! A [`Host`] is one member of the cluster: its transport endpoint, the
//! objects it owns, its cache of remote objects and both directories.
//! Every operation routes on the handle: handles owned here go to the
//! owner-side directory, all others to the requester-side directory.
//!
//! Nothing happens on the network until someone calls [`Host::poll`] or
//! [`Host::do_network_work`]; application threads only ever register
//! interest and return.

use std::sync::Arc;

use dsmc_util::{Handle, HostId, ResolveMode};

use crate::cache::{LocalCache, ObjectCell, ObjectStore};
use crate::config::DirConfig;
use crate::directory::{
    DirContext, OwnerDirectory, OwnerSnapshot, RemoteState, RequesterDirectory,
};
use crate::error::{DirError, Result};
use crate::logging::{DirLogger, DirLoggerConfig};
use crate::net::{Envelope, HandlerId, ObjectMessage, RequestMessage, Transport};
use crate::stats::DirStats;
use crate::typeops::{Transferable, TypeOps};

/// One host of the cluster.
pub struct Host {
    ctx: Arc<DirContext>,
    store: Arc<ObjectStore>,
    cache: Arc<LocalCache>,
    owner: OwnerDirectory,
    requester: RequesterDirectory,
}

impl Host {
    /// Build a host around its transport endpoint.
    ///
    /// # Errors
    ///
    /// `Configuration` if `config` fails validation.
    pub fn new(transport: Arc<dyn Transport>, config: DirConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| DirError::Configuration(err.to_string()))?;

        let me = transport.id();
        let logger = Arc::new(DirLogger::new(
            me,
            DirLoggerConfig {
                buffer: config.event_log,
                console: config.verbose,
                ..Default::default()
            },
        ));
        let ctx = Arc::new(DirContext {
            me,
            transport,
            config,
            stats: Arc::new(DirStats::new()),
            logger,
        });
        let store = Arc::new(ObjectStore::new(me));
        let cache = Arc::new(LocalCache::new());

        log::debug!("host {} joined a cluster of {}", me, ctx.transport.num_hosts());

        Ok(Self {
            owner: OwnerDirectory::new(ctx.clone(), store.clone()),
            requester: RequesterDirectory::new(ctx.clone(), cache.clone()),
            ctx,
            store,
            cache,
        })
    }

    pub fn id(&self) -> HostId {
        self.ctx.me
    }

    pub fn config(&self) -> &DirConfig {
        &self.ctx.config
    }

    fn is_owned(&self, handle: Handle) -> bool {
        handle.is_local(self.ctx.me)
    }

    /// Make `value` a shared object owned by this host.
    pub fn allocate<T: Transferable>(&self, value: T) -> Handle {
        self.store.allocate(value, TypeOps::of::<T>())
    }

    fn check_home_type<T: Transferable>(&self, handle: Handle) -> Result<()> {
        let home = self
            .store
            .get(handle)
            .ok_or_else(|| DirError::Internal(format!("no home object for {}", handle)))?;
        if home.ops.tag() != TypeOps::of::<T>().tag() {
            return Err(DirError::TypeMismatch {
                handle,
                expected: home.ops.name(),
            });
        }
        Ok(())
    }

    /// Start bringing `handle` here in `mode`, if it is not already.
    pub fn fetch<T: Transferable>(&self, handle: Handle, mode: ResolveMode) -> Result<()> {
        self.fetch_impl::<T>(handle, mode, false)
    }

    /// Like [`fetch`](Self::fetch), and hold on to the object once it
    /// arrives until [`clear_contended`](Self::clear_contended).
    pub fn set_contended<T: Transferable>(&self, handle: Handle, mode: ResolveMode) -> Result<()> {
        self.fetch_impl::<T>(handle, mode, true)
    }

    fn fetch_impl<T: Transferable>(
        &self,
        handle: Handle,
        mode: ResolveMode,
        contend: bool,
    ) -> Result<()> {
        if self.is_owned(handle) {
            self.check_home_type::<T>(handle)?;
            self.owner.fetch(handle, mode, contend)
        } else {
            self.requester
                .fetch(handle, mode, TypeOps::of::<T>(), contend)
        }
    }

    pub fn clear_contended(&self, handle: Handle) -> Result<()> {
        if self.is_owned(handle) {
            self.owner.clear_contended(handle)
        } else {
            self.requester.clear_contended(handle)
        }
    }

    /// Recall every copy of an owned object.
    ///
    /// # Errors
    ///
    /// `NotOwner` when `handle` belongs to another host.
    pub fn invalidate(&self, handle: Handle) -> Result<()> {
        if !self.is_owned(handle) {
            return Err(DirError::NotOwner { handle });
        }
        self.owner.invalidate(handle)
    }

    /// Run `callback` once `handle` may be used here in `mode`.
    ///
    /// Returns false without registering if that is already the case.
    pub fn notify(
        &self,
        handle: Handle,
        mode: ResolveMode,
        callback: impl FnOnce(Handle) + Send + 'static,
    ) -> bool {
        if self.is_owned(handle) {
            self.owner.notify(handle, mode, Box::new(callback))
        } else {
            self.requester.notify(handle, mode, Box::new(callback))
        }
    }

    /// Whether `handle` may be used here in `mode` right now.
    pub fn resolve(&self, handle: Handle, mode: ResolveMode) -> bool {
        if self.is_owned(handle) {
            self.store.get(handle).is_some() && self.owner.resolve(handle, mode)
        } else {
            self.requester.resolve(handle, mode)
        }
    }

    fn cell(&self, handle: Handle, mode: ResolveMode) -> Option<Arc<ObjectCell>> {
        if self.is_owned(handle) {
            self.store.get(handle).map(|home| home.cell)
        } else {
            self.cache.resolve(handle, mode.normalized().wants_write())
        }
    }

    /// Use the object under its lock, if it may be used here in `mode`.
    ///
    /// Returns `Ok(None)` when the object is not available in `mode`; fetch
    /// it and poll. While `f` runs the directory will not move the object.
    /// Changes made under a read-only mode stay local.
    pub fn with_object<T: Transferable, R>(
        &self,
        handle: Handle,
        mode: ResolveMode,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<Option<R>> {
        if !self.resolve(handle, mode) {
            return Ok(None);
        }
        let Some(cell) = self.cell(handle, mode) else {
            return Ok(None);
        };
        let mut guard = cell.lock();
        // The directory may have moved the object before the lock was taken.
        if !self.resolve(handle, mode) {
            return Ok(None);
        }
        match guard.downcast_mut::<T>() {
            Some(value) => Ok(Some(f(value))),
            None => Err(DirError::TypeMismatch {
                handle,
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Drain up to `max_poll_batch` inbound messages into the directories.
    ///
    /// A message that cannot be handled is logged and dropped; only a
    /// failing transport stops the drain. Returns the number of messages
    /// taken off the wire.
    pub fn poll(&self) -> Result<usize> {
        let mut handled = 0;
        while handled < self.ctx.config.max_poll_batch {
            let Some(envelope) = self.ctx.transport.try_recv()? else {
                break;
            };
            let src = envelope.src;
            handled += 1;
            match self.dispatch(envelope) {
                Ok(()) => {},
                Err(err @ (DirError::Transport(_) | DirError::Disconnected { .. })) => {
                    return Err(err)
                },
                Err(err) => {
                    log::warn!("host {}: dropped message from host {}: {}", self.ctx.me, src, err);
                },
            }
        }
        Ok(handled)
    }

    fn dispatch(&self, envelope: Envelope) -> Result<()> {
        self.ctx.count(|stats| stats.record_received());
        match envelope.handler {
            HandlerId::Object => {
                let message = ObjectMessage::decode(&envelope.body)?;
                if self.is_owned(message.handle) {
                    self.owner.recv_object(envelope.src, message)
                } else {
                    self.requester.recv_object(envelope.src, message)
                }
            },
            HandlerId::Request => {
                let message = RequestMessage::decode(&envelope.body)?;
                if self.is_owned(message.handle) {
                    self.owner.recv_request(message)
                } else {
                    self.requester.recv_request(message)
                }
            },
        }
    }

    /// Retry everything that was deferred on both sides.
    pub fn make_progress(&self) -> Result<()> {
        self.requester.make_progress()?;
        self.owner.make_progress()
    }

    /// Poll, make progress, poll again.
    pub fn do_network_work(&self) -> Result<usize> {
        let mut handled = self.poll()?;
        self.make_progress()?;
        handled += self.poll()?;
        Ok(handled)
    }

    /// Nothing in flight, nothing deferred and nothing queued for this host.
    pub fn is_quiescent(&self) -> bool {
        self.ctx.transport.queued() == 0 && self.requester.is_idle() && self.owner.is_idle()
    }

    pub fn requester_state(&self, handle: Handle) -> RemoteState {
        self.requester.state(handle)
    }

    pub fn owner_snapshot(&self, handle: Handle) -> OwnerSnapshot {
        self.owner.snapshot(handle)
    }

    /// Value of an object as this host currently sees it, ignoring modes.
    pub fn peek<T: Transferable + Clone>(&self, handle: Handle) -> Option<T> {
        self.cell(handle, ResolveMode::ReadOnly)?.snapshot::<T>()
    }

    pub fn dump(&self) -> String {
        let mut out = format!(
            "host {}: {} owned, {} cached\n",
            self.ctx.me,
            self.store.len(),
            self.cache.len()
        );
        out.push_str(&self.owner.dump());
        out.push_str(&self.requester.dump());
        out
    }

    pub fn stats(&self) -> &DirStats {
        &self.ctx.stats
    }

    pub fn logger(&self) -> &DirLogger {
        &self.ctx.logger
    }

    /// Handles with live metadata: (owner side, requester side).
    pub fn tracked(&self) -> (usize, usize) {
        (self.owner.tracked(), self.requester.tracked())
    }
}
