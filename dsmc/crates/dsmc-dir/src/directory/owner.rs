//! Owner-side directory
//!
//! Runs on the host that owns a handle. For each owned handle it records
//! who holds copies and who is queued for them, and after every event it
//! reconciles that record: pick the next host to serve, then send it the
//! object, invalidate the readers in its way, forward its request to the
//! current writer, or recall the writer.
//!
//! Queued hosts are served lowest id first. A host waiting for write access
//! beats the same id waiting to read, though a host never waits for both.
//! The owner's own local wants are queued under its own id and are
//! satisfied without any message.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use dsmc_util::{FxHashSet, Handle, HostId, ResolveMode};
use parking_lot::Mutex;
use serde::Serialize;

use super::{take_satisfied, Callback, DirContext, MetaTable, Reclaim, Waiter};
use crate::cache::{HomeObject, ObjectStore};
use crate::error::{DirError, Result};
use crate::logging::DirEvent;
use crate::net::{ObjectMessage, RequestMessage};

#[derive(Default)]
pub(crate) struct OwnerMeta {
    ro_holders: BTreeSet<HostId>,
    rw_holder: Option<HostId>,
    recalled_to: Option<HostId>,
    /// Readers sent an invalidation whose release has not arrived
    invalidating: BTreeSet<HostId>,
    pending_ro: BTreeSet<HostId>,
    pending_rw: BTreeSet<HostId>,
    contended: bool,
    waiters: Vec<Waiter>,
    /// Writeback that arrived while the home object was in use
    parked: Option<ParkedWriteback>,
    /// Invalidation asked for while the writer was being recalled
    invalidate_on_writeback: bool,
}

struct ParkedWriteback {
    src: HostId,
    mode: ResolveMode,
    bytes: Vec<u8>,
}

enum Step {
    Progressed,
    Blocked,
}

impl Reclaim for OwnerMeta {
    fn is_reclaimable(&self) -> bool {
        self.is_resident()
            && self.recalled_to.is_none()
            && self.pending_ro.is_empty()
            && self.pending_rw.is_empty()
            && !self.contended
            && self.waiters.is_empty()
            && self.parked.is_none()
            && !self.invalidate_on_writeback
    }
}

impl OwnerMeta {
    fn is_resident(&self) -> bool {
        self.rw_holder.is_none() && self.ro_holders.is_empty()
    }

    /// Whether the owner itself may use the home object in `mode`.
    ///
    /// Never while a writeback is parked: the home bytes are stale.
    fn local_satisfies(&self, mode: ResolveMode) -> bool {
        if self.parked.is_some() {
            return mode.normalized() == ResolveMode::Invalid;
        }
        match mode.normalized() {
            ResolveMode::ReadOnly => self.rw_holder.is_none(),
            ResolveMode::ReadWrite => self.is_resident(),
            _ => true,
        }
    }

    /// Queue a local want. A write want replaces a read want.
    fn want_locally(&mut self, me: HostId, mode: ResolveMode) {
        match mode.normalized() {
            ResolveMode::ReadWrite => {
                self.pending_ro.remove(&me);
                self.pending_rw.insert(me);
            },
            ResolveMode::ReadOnly => {
                if !self.pending_rw.contains(&me) {
                    self.pending_ro.insert(me);
                }
            },
            _ => {},
        }
    }

    /// Lowest queued host and whether it wants write access.
    fn next_dest(&self, me: HostId) -> Option<(HostId, bool)> {
        let (ro, rw) = if self.contended {
            (
                self.pending_ro.get(&me).copied(),
                self.pending_rw.get(&me).copied(),
            )
        } else {
            (
                self.pending_ro.first().copied(),
                self.pending_rw.first().copied(),
            )
        };
        match (ro, rw) {
            (None, None) => None,
            (Some(reader), None) => Some((reader, false)),
            (None, Some(writer)) => Some((writer, true)),
            (Some(reader), Some(writer)) if writer <= reader => Some((writer, true)),
            (Some(reader), Some(_)) => Some((reader, false)),
        }
    }

    fn take_satisfied(&mut self) -> Vec<Callback> {
        let read_ok = self.local_satisfies(ResolveMode::ReadOnly);
        let write_ok = self.local_satisfies(ResolveMode::ReadWrite);
        take_satisfied(&mut self.waiters, |mode| match mode.normalized() {
            ResolveMode::ReadOnly => read_ok,
            ResolveMode::ReadWrite => write_ok,
            _ => true,
        })
    }

    fn check_invariants(&self, handle: Handle) {
        crate::protocol_assert!(
            self.rw_holder.is_none() || self.ro_holders.is_empty(),
            handle,
            "writer {:?} coexists with readers {:?}",
            self.rw_holder,
            self.ro_holders
        );
        if let Some(recalled) = self.recalled_to {
            crate::protocol_assert!(
                self.rw_holder == Some(recalled) || self.ro_holders.contains(&recalled),
                handle,
                "recall outstanding to {} which holds nothing",
                recalled
            );
        }
        crate::protocol_assert!(
            self.invalidating.is_subset(&self.ro_holders),
            handle,
            "invalidating {:?} outside readers {:?}",
            self.invalidating,
            self.ro_holders
        );
    }

    fn snapshot(&self) -> OwnerSnapshot {
        OwnerSnapshot {
            ro_holders: self.ro_holders.iter().copied().collect(),
            rw_holder: self.rw_holder,
            recalled_to: self.recalled_to,
            invalidating: self.invalidating.iter().copied().collect(),
            pending_ro: self.pending_ro.iter().copied().collect(),
            pending_rw: self.pending_rw.iter().copied().collect(),
            contended: self.contended,
            waiters: self.waiters.len(),
        }
    }
}

/// Point-in-time copy of an owned handle's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OwnerSnapshot {
    pub ro_holders: Vec<HostId>,
    pub rw_holder: Option<HostId>,
    pub recalled_to: Option<HostId>,
    pub invalidating: Vec<HostId>,
    pub pending_ro: Vec<HostId>,
    pub pending_rw: Vec<HostId>,
    pub contended: bool,
    pub waiters: usize,
}

impl OwnerSnapshot {
    pub fn is_resident(&self) -> bool {
        self.rw_holder.is_none() && self.ro_holders.is_empty()
    }
}

fn hosts(set: &[HostId]) -> String {
    let ids: Vec<String> = set.iter().map(|host| host.to_string()).collect();
    format!("{{{}}}", ids.join(","))
}

fn host_or_dash(host: Option<HostId>) -> String {
    host.map(|host| host.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for OwnerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RO={} RW={} recalled={} pendingRO={} pendingRW={} contended={} waiters={}",
            hosts(&self.ro_holders),
            host_or_dash(self.rw_holder),
            host_or_dash(self.recalled_to),
            hosts(&self.pending_ro),
            hosts(&self.pending_rw),
            self.contended,
            self.waiters
        )
    }
}

/// Directory for the handles this host owns.
pub struct OwnerDirectory {
    ctx: Arc<DirContext>,
    store: Arc<ObjectStore>,
    table: MetaTable<OwnerMeta>,
    retry: Mutex<FxHashSet<Handle>>,
}

impl OwnerDirectory {
    pub fn new(ctx: Arc<DirContext>, store: Arc<ObjectStore>) -> Self {
        Self {
            ctx,
            store,
            table: MetaTable::new(),
            retry: Mutex::new(FxHashSet::default()),
        }
    }

    fn home(&self, handle: Handle) -> Result<HomeObject> {
        self.store
            .get(handle)
            .ok_or_else(|| DirError::Internal(format!("no home object for {}", handle)))
    }

    /// Local want for an owned handle; `contend` also raises the priority flag.
    pub fn fetch(&self, handle: Handle, mode: ResolveMode, contend: bool) -> Result<()> {
        let home = self.home(handle)?;
        let me = self.ctx.me;
        let fired = self
            .table
            .with(handle, true, |md| -> Result<Vec<Callback>> {
                if contend {
                    md.contended = true;
                }
                let mut fired = Vec::new();
                if !md.local_satisfies(mode) {
                    md.want_locally(me, mode);
                    self.reconcile(handle, md, &home, &mut fired)?;
                }
                Ok(fired)
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;
        self.ctx.fire(handle, fired);
        Ok(())
    }

    pub fn clear_contended(&self, handle: Handle) -> Result<()> {
        let home = self.home(handle)?;
        let fired = self
            .table
            .with(handle, false, |md| -> Result<Vec<Callback>> {
                md.contended = false;
                let mut fired = Vec::new();
                self.reconcile(handle, md, &home, &mut fired)?;
                Ok(fired)
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;
        self.ctx.fire(handle, fired);
        Ok(())
    }

    /// Recall every copy of `handle`.
    ///
    /// A writer already being recalled may write back and keep a read copy;
    /// that copy is invalidated as soon as the writeback lands.
    pub fn invalidate(&self, handle: Handle) -> Result<()> {
        let home = self.home(handle)?;
        let me = self.ctx.me;
        self.table
            .with(handle, false, |md| -> Result<()> {
                self.invalidate_readers(handle, md, &home, None)?;
                match (md.rw_holder, md.recalled_to) {
                    (Some(writer), None) => {
                        md.recalled_to = Some(writer);
                        self.ctx
                            .send_request(home.ops, writer, handle, me, ResolveMode::Invalid)?;
                        self.ctx.count(|stats| stats.record_recall());
                    },
                    (Some(_), Some(_)) => md.invalidate_on_writeback = true,
                    _ => {},
                }
                md.check_invariants(handle);
                Ok(())
            })
            .unwrap_or(Ok(()))
    }

    /// Register `callback` for when the owner may use the object in `mode`.
    ///
    /// Returns false, registering nothing, if it already may.
    pub fn notify(&self, handle: Handle, mode: ResolveMode, callback: Callback) -> bool {
        self.table
            .with(handle, true, |md| {
                if md.local_satisfies(mode) {
                    false
                } else {
                    md.waiters.push(Waiter { mode, callback });
                    true
                }
            })
            .unwrap_or(false)
    }

    pub fn resolve(&self, handle: Handle, mode: ResolveMode) -> bool {
        self.table
            .with(handle, false, |md| md.local_satisfies(mode))
            .unwrap_or(true)
    }

    pub fn snapshot(&self, handle: Handle) -> OwnerSnapshot {
        self.table
            .with(handle, false, |md| md.snapshot())
            .unwrap_or_default()
    }

    /// Landing pad for a request naming an owned handle.
    pub fn recv_request(&self, message: RequestMessage) -> Result<()> {
        let RequestMessage {
            handle,
            whom,
            mode,
            tag,
        } = message;
        let home = self.home(handle)?;
        if tag != home.ops.tag() {
            return self.reject(handle, &home, whom, mode);
        }
        self.ctx.log(DirEvent::RequestReceived { handle, whom, mode });

        let fired = self
            .table
            .with(handle, true, |md| -> Result<Vec<Callback>> {
                match mode {
                    ResolveMode::ReadOnly => {
                        crate::protocol_assert!(
                            !md.ro_holders.contains(&whom) && !md.pending_ro.contains(&whom),
                            handle,
                            "host {} asked for RO again",
                            whom
                        );
                        crate::protocol_assert!(
                            md.rw_holder != Some(whom) && !md.pending_rw.contains(&whom),
                            handle,
                            "host {} asked for RO while holding or wanting RW",
                            whom
                        );
                        md.pending_ro.insert(whom);
                    },
                    ResolveMode::ReadWrite | ResolveMode::UpgradeRw => {
                        crate::protocol_assert!(
                            md.rw_holder != Some(whom) && !md.pending_rw.contains(&whom),
                            handle,
                            "host {} asked for RW again",
                            whom
                        );
                        crate::protocol_assert!(
                            !md.pending_ro.contains(&whom),
                            handle,
                            "host {} queued for both RO and RW",
                            whom
                        );
                        md.pending_rw.insert(whom);
                    },
                    ResolveMode::Invalid => {
                        if !md.ro_holders.remove(&whom) {
                            crate::protocol_violation!(
                                handle,
                                "release from host {} which holds no copy",
                                whom
                            );
                        }
                        md.invalidating.remove(&whom);
                    },
                    ResolveMode::UpgradeRo => {
                        crate::protocol_violation!(handle, "UP_RO request from host {}", whom)
                    },
                }
                let mut fired = Vec::new();
                self.reconcile(handle, md, &home, &mut fired)?;
                Ok(fired)
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;
        self.ctx.fire(handle, fired);
        Ok(())
    }

    /// Landing pad for an object written back to this owner.
    pub fn recv_object(&self, src: HostId, message: ObjectMessage) -> Result<()> {
        let ObjectMessage {
            handle,
            mode,
            tag,
            bytes,
        } = message;
        let home = self.home(handle)?;
        if tag != home.ops.tag() {
            return Err(DirError::TypeMismatch {
                handle,
                expected: home.ops.name(),
            });
        }
        self.ctx.log(DirEvent::ObjectReceived { handle, src, mode });

        let fired = self
            .table
            .with(handle, true, |md| -> Result<Vec<Callback>> {
                crate::protocol_assert!(
                    md.rw_holder == Some(src),
                    handle,
                    "object from host {} which does not hold it",
                    src
                );
                crate::protocol_assert!(
                    matches!(mode, ResolveMode::Invalid | ResolveMode::UpgradeRo),
                    handle,
                    "writeback carries mode {}",
                    mode
                );
                crate::protocol_assert!(
                    md.parked.is_none(),
                    handle,
                    "second writeback from host {}",
                    src
                );
                // The sender no longer holds a writable copy, whether or not
                // the bytes can be installed yet.
                md.rw_holder = None;
                md.recalled_to = None;
                if mode == ResolveMode::UpgradeRo {
                    md.ro_holders.insert(src);
                }
                md.parked = Some(ParkedWriteback { src, mode, bytes });
                if std::mem::take(&mut md.invalidate_on_writeback) {
                    self.invalidate_readers(handle, md, &home, None)?;
                }
                let mut fired = Vec::new();
                self.reconcile(handle, md, &home, &mut fired)?;
                Ok(fired)
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;
        self.ctx.fire(handle, fired);
        Ok(())
    }

    /// Retry handles whose reconciliation stopped on a busy home object.
    ///
    /// A failing handle does not stop the others; the first error is
    /// returned after the whole batch.
    pub fn make_progress(&self) -> Result<()> {
        let mut handles: Vec<Handle> = std::mem::take(&mut *self.retry.lock())
            .into_iter()
            .collect();
        handles.sort();

        let mut first_error = None;
        for handle in handles {
            if let Err(err) = self.retry_one(handle) {
                log::warn!("host {}: retry of {} failed: {}", self.ctx.me, handle, err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn retry_one(&self, handle: Handle) -> Result<()> {
        let home = self.home(handle)?;
        let fired = self.table.with(handle, false, |md| -> Result<Vec<Callback>> {
            let mut fired = Vec::new();
            self.reconcile(handle, md, &home, &mut fired)?;
            Ok(fired)
        });
        if let Some(fired) = fired {
            self.ctx.fire(handle, fired?);
        }
        Ok(())
    }

    /// No reconciliation is waiting on a busy object.
    pub fn is_idle(&self) -> bool {
        self.retry.lock().is_empty()
    }

    pub fn tracked(&self) -> usize {
        self.table.len()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for handle in self.table.handles() {
            if let Some(snapshot) = self.table.with(handle, false, |md| md.snapshot()) {
                out.push_str(&format!("  owner {} {}\n", handle, snapshot));
            }
        }
        out
    }

    /// Refuse a request naming `handle` as another type.
    ///
    /// A fetch gets an `INVALID` object back so the requester stops
    /// waiting. Anything else cannot come from a requester that was ever
    /// served this handle.
    fn reject(
        &self,
        handle: Handle,
        home: &HomeObject,
        whom: HostId,
        mode: ResolveMode,
    ) -> Result<()> {
        let is_fetch = matches!(
            mode,
            ResolveMode::ReadOnly | ResolveMode::ReadWrite | ResolveMode::UpgradeRw
        );
        if !is_fetch || whom == self.ctx.me {
            return Err(DirError::TypeMismatch {
                handle,
                expected: home.ops.name(),
            });
        }
        log::warn!(
            "host {}: host {} fetched {} as the wrong type, it holds {}",
            self.ctx.me,
            whom,
            handle,
            home.ops.name()
        );
        self.ctx.log(DirEvent::Rejected {
            handle,
            host: whom,
            expected: home.ops.name().to_string(),
        });
        self.ctx
            .send_object(home.ops, whom, handle, Vec::new(), ResolveMode::Invalid)
    }

    fn defer(&self, handle: Handle, reason: &str) -> Result<Step> {
        self.retry.lock().insert(handle);
        self.ctx.deferred(handle, reason);
        Ok(Step::Blocked)
    }

    /// Install a parked writeback into the home object if it is free.
    fn apply_writeback(
        &self,
        handle: Handle,
        md: &mut OwnerMeta,
        home: &HomeObject,
    ) -> Result<bool> {
        let Some(parked) = md.parked.take() else {
            return Ok(true);
        };
        let Some(mut guard) = home.cell.try_lock() else {
            md.parked = Some(parked);
            self.ctx.count(|stats| stats.record_deferred_writeback());
            self.defer(handle, "home object in use")?;
            return Ok(false);
        };
        if let Err(err) = home.ops.deserialize(handle, &parked.bytes, &mut **guard) {
            md.parked = Some(parked);
            return Err(err);
        }
        drop(guard);

        log::trace!(
            "installed {} writeback of {} from host {}",
            parked.mode,
            handle,
            parked.src
        );
        self.ctx.count(|stats| stats.record_writeback());
        Ok(true)
    }

    /// Serve queued hosts until one has to wait.
    ///
    /// A parked writeback is installed first; nothing is served from stale
    /// home bytes. Local waiters are collected into `fired` as soon as they
    /// are satisfied, since serving the next host may take that state away.
    fn reconcile(
        &self,
        handle: Handle,
        md: &mut OwnerMeta,
        home: &HomeObject,
        fired: &mut Vec<Callback>,
    ) -> Result<()> {
        if !self.apply_writeback(handle, md, home)? {
            md.check_invariants(handle);
            return Ok(());
        }
        let me = self.ctx.me;
        loop {
            fired.extend(md.take_satisfied());
            if md.local_satisfies(ResolveMode::ReadWrite) {
                md.pending_rw.remove(&me);
            }
            if md.local_satisfies(ResolveMode::ReadOnly) {
                md.pending_ro.remove(&me);
            }

            let Some((next, wants_rw)) = md.next_dest(me) else {
                break;
            };
            let step = if wants_rw {
                self.serve_writer(handle, md, home, next)?
            } else {
                self.serve_readers(handle, md, home, next)?
            };
            if let Step::Blocked = step {
                break;
            }
        }
        fired.extend(md.take_satisfied());
        md.check_invariants(handle);
        Ok(())
    }

    fn serve_writer(
        &self,
        handle: Handle,
        md: &mut OwnerMeta,
        home: &HomeObject,
        next: HostId,
    ) -> Result<Step> {
        if let Some(writer) = md.rw_holder {
            return self.displace_writer(handle, md, home, writer, next, ResolveMode::ReadWrite);
        }

        if md.ro_holders.is_empty() {
            let Some(guard) = home.cell.try_lock() else {
                return self.defer(handle, "home object in use");
            };
            let bytes = home.ops.encode(handle, &**guard)?;
            drop(guard);

            md.pending_rw.remove(&next);
            md.rw_holder = Some(next);
            self.ctx
                .send_object(home.ops, next, handle, bytes, ResolveMode::ReadWrite)?;
            return Ok(Step::Progressed);
        }

        let sole_reader = md.ro_holders.len() == 1 && md.ro_holders.contains(&next);
        if sole_reader && !md.invalidating.contains(&next) {
            // Upgrade in place: the reader's bytes are current.
            if home.cell.try_lock().is_none() {
                return self.defer(handle, "home object in use");
            }
            md.pending_rw.remove(&next);
            md.ro_holders.clear();
            md.rw_holder = Some(next);
            self.ctx
                .send_object(home.ops, next, handle, Vec::new(), ResolveMode::UpgradeRw)?;
            return Ok(Step::Progressed);
        }

        self.invalidate_readers(handle, md, home, Some(next))?;
        Ok(Step::Blocked)
    }

    fn serve_readers(
        &self,
        handle: Handle,
        md: &mut OwnerMeta,
        home: &HomeObject,
        next: HostId,
    ) -> Result<Step> {
        if let Some(writer) = md.rw_holder {
            return self.displace_writer(handle, md, home, writer, next, ResolveMode::ReadOnly);
        }

        let me = self.ctx.me;
        let readers: Vec<HostId> = if md.contended {
            Vec::new()
        } else {
            md.pending_ro.iter().copied().filter(|host| *host != me).collect()
        };
        let served_readers = !readers.is_empty();
        if served_readers {
            let Some(guard) = home.cell.try_lock() else {
                return self.defer(handle, "home object in use");
            };
            let bytes = home.ops.encode(handle, &**guard)?;
            drop(guard);

            for reader in readers {
                md.pending_ro.remove(&reader);
                md.ro_holders.insert(reader);
                self.ctx
                    .send_object(home.ops, reader, handle, bytes.clone(), ResolveMode::ReadOnly)?;
            }
        }
        let served_self = md.pending_ro.remove(&me);
        if !served_readers && !served_self {
            return Ok(Step::Blocked);
        }
        Ok(Step::Progressed)
    }

    /// Get the current writer out of the way of `next`.
    ///
    /// A remote writer-to-be has the request forwarded so the object moves
    /// between the two hosts directly. Anything else recalls the object
    /// home, at most one recall at a time.
    fn displace_writer(
        &self,
        handle: Handle,
        md: &mut OwnerMeta,
        home: &HomeObject,
        writer: HostId,
        next: HostId,
        wanted: ResolveMode,
    ) -> Result<Step> {
        if md.recalled_to.is_some() {
            return Ok(Step::Blocked);
        }
        crate::protocol_assert!(
            writer != next,
            handle,
            "host {} queued for access it already holds",
            next
        );

        if wanted == ResolveMode::ReadWrite && next != self.ctx.me {
            md.pending_rw.remove(&next);
            md.rw_holder = Some(next);
            self.ctx
                .send_request(home.ops, writer, handle, next, ResolveMode::ReadWrite)?;
            self.ctx.count(|stats| stats.record_forward());
            return Ok(Step::Progressed);
        }

        md.recalled_to = Some(writer);
        self.ctx.send_request(home.ops, writer, handle, next, wanted)?;
        self.ctx.count(|stats| stats.record_recall());
        Ok(Step::Blocked)
    }

    fn invalidate_readers(
        &self,
        handle: Handle,
        md: &mut OwnerMeta,
        home: &HomeObject,
        keep: Option<HostId>,
    ) -> Result<()> {
        let targets: Vec<HostId> = md
            .ro_holders
            .iter()
            .copied()
            .filter(|reader| Some(*reader) != keep && !md.invalidating.contains(reader))
            .collect();
        for reader in targets {
            md.invalidating.insert(reader);
            self.ctx
                .send_request(home.ops, reader, handle, self.ctx.me, ResolveMode::Invalid)?;
            self.ctx.count(|stats| stats.record_invalidation());
        }
        Ok(())
    }
}
