//! Requester-side directory
//!
//! Tracks this host's copy of every handle owned elsewhere:
//!
//! ```text
//! Invalid --fetch(RO)--> PendingRO --object--> HereRO
//! Invalid --fetch(RW)--> PendingRW --object--> HereRW
//! HereRO  --fetch(RW)--> Upgrade   --grant---> HereRW
//! HereRO  --invalidate--> Invalid
//! HereRW  --recall-----> Invalid  (or HereRO when downgrading)
//! Upgrade --invalidate--> PendingRW
//! ```
//!
//! At most one request per handle is ever in flight. Recalls that arrive
//! while the copy is in flight, held by contention, or in local use are
//! kept on the entry and answered in arrival order by a later
//! `make_progress`.
//!
//! An owner that cannot serve a request (the handle holds another type)
//! answers with an `INVALID` object. The entry drops back to `Invalid` and
//! remembers the owner's type, so the next fetch of the wrong type fails.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dsmc_util::{FxHashMap, FxHashSet, Handle, HostId, ResolveMode};
use parking_lot::Mutex;
use serde::Serialize;

use super::{take_satisfied, Callback, DirContext, MetaTable, Reclaim, Waiter};
use crate::cache::LocalCache;
use crate::error::{DirError, Result};
use crate::logging::DirEvent;
use crate::net::{ObjectMessage, RequestMessage};
use crate::typeops::{TypeOps, TypeTag};

/// State of this host's copy of a remote handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RemoteState {
    /// Not present and not requested
    #[default]
    Invalid,
    /// Requested read-only
    PendingRo,
    /// Requested read-write
    PendingRw,
    HereRo,
    HereRw,
    /// Present read-only, write access requested
    Upgrade,
}

impl RemoteState {
    pub fn satisfies(self, mode: ResolveMode) -> bool {
        match mode.normalized() {
            ResolveMode::ReadOnly => matches!(
                self,
                RemoteState::HereRo | RemoteState::HereRw | RemoteState::Upgrade
            ),
            ResolveMode::ReadWrite => self == RemoteState::HereRw,
            _ => true,
        }
    }

    /// No copy is here yet.
    pub fn is_pending(self) -> bool {
        matches!(self, RemoteState::PendingRo | RemoteState::PendingRw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteState::Invalid => "INVALID",
            RemoteState::PendingRo => "PENDING_RO",
            RemoteState::PendingRw => "PENDING_RW",
            RemoteState::HereRo => "HERE_RO",
            RemoteState::HereRw => "HERE_RW",
            RemoteState::Upgrade => "UPGRADE",
        }
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct DeferredRecall {
    whom: HostId,
    mode: ResolveMode,
}

#[derive(Default)]
pub(crate) struct RequesterMeta {
    state: RemoteState,
    contended: bool,
    waiters: Vec<Waiter>,
    ops: Option<&'static TypeOps>,
    /// Write wanted while a read request was in flight
    unsent: Option<ResolveMode>,
    deferred: VecDeque<DeferredRecall>,
    /// Owner's type after it rejected a fetch
    owner_tag: Option<TypeTag>,
}

impl Reclaim for RequesterMeta {
    fn is_reclaimable(&self) -> bool {
        self.state == RemoteState::Invalid
            && !self.contended
            && self.waiters.is_empty()
            && self.unsent.is_none()
            && self.deferred.is_empty()
            && self.owner_tag.is_none()
    }
}

impl RequesterMeta {
    fn take_satisfied(&mut self) -> Vec<Callback> {
        let state = self.state;
        take_satisfied(&mut self.waiters, |mode| state.satisfies(mode))
    }

    /// Contention holds recalls back only once the copy is here. An upgrade
    /// in flight gives way, or owner and requester would wait on each other.
    fn holds_contended(&self) -> bool {
        self.contended && matches!(self.state, RemoteState::HereRo | RemoteState::HereRw)
    }
}

/// The single in-flight request for a handle.
#[derive(Debug, Clone, Copy)]
pub struct Outstanding {
    pub dest: HostId,
    pub mode: ResolveMode,
    sent_at: Instant,
}

/// Directory for handles owned by other hosts.
pub struct RequesterDirectory {
    ctx: Arc<DirContext>,
    cache: Arc<LocalCache>,
    table: MetaTable<RequesterMeta>,
    outstanding: Mutex<FxHashMap<Handle, Outstanding>>,
    retry: Mutex<FxHashSet<Handle>>,
}

impl RequesterDirectory {
    pub fn new(ctx: Arc<DirContext>, cache: Arc<LocalCache>) -> Self {
        Self {
            ctx,
            cache,
            table: MetaTable::new(),
            outstanding: Mutex::new(FxHashMap::default()),
            retry: Mutex::new(FxHashSet::default()),
        }
    }

    /// Start moving the local copy towards `mode`, if it is not there already.
    pub fn fetch(
        &self,
        handle: Handle,
        mode: ResolveMode,
        ops: &'static TypeOps,
        contend: bool,
    ) -> Result<()> {
        self.table
            .with(handle, true, |md| -> Result<()> {
                let ops = bind_ops(handle, md, ops)?;
                if contend {
                    md.contended = true;
                }
                self.request_access(handle, md, ops, mode)
            })
            .unwrap_or(Ok(()))
    }

    /// Drop the priority flag and answer any recall it held back.
    pub fn clear_contended(&self, handle: Handle) -> Result<()> {
        let fired = self
            .table
            .with(handle, false, |md| -> Result<Vec<Callback>> {
                md.contended = false;
                self.drain_deferred(handle, md)?;
                Ok(md.take_satisfied())
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;
        self.ctx.fire(handle, fired);
        Ok(())
    }

    /// Register `callback` for when the local copy satisfies `mode`.
    ///
    /// Returns false, registering nothing, if it already does.
    pub fn notify(&self, handle: Handle, mode: ResolveMode, callback: Callback) -> bool {
        self.table
            .with(handle, true, |md| {
                if md.state.satisfies(mode) {
                    false
                } else {
                    md.waiters.push(Waiter { mode, callback });
                    true
                }
            })
            .unwrap_or(false)
    }

    pub fn state(&self, handle: Handle) -> RemoteState {
        self.table
            .with(handle, false, |md| md.state)
            .unwrap_or_default()
    }

    pub fn resolve(&self, handle: Handle, mode: ResolveMode) -> bool {
        self.state(handle).satisfies(mode)
            && self
                .cache
                .resolve(handle, mode.normalized().wants_write())
                .is_some()
    }

    pub fn outstanding(&self, handle: Handle) -> Option<Outstanding> {
        self.outstanding.lock().get(&handle).copied()
    }

    /// No request in flight and no deferred work.
    pub fn is_idle(&self) -> bool {
        self.outstanding.lock().is_empty() && self.retry.lock().is_empty()
    }

    pub fn tracked(&self) -> usize {
        self.table.len()
    }

    /// Landing pad for an object sent by the owner or a forwarding writer.
    pub fn recv_object(&self, src: HostId, message: ObjectMessage) -> Result<()> {
        let ObjectMessage {
            handle,
            mode,
            tag,
            bytes,
        } = message;
        self.ctx.log(DirEvent::ObjectReceived { handle, src, mode });

        let fired = self.table.with(handle, false, |md| -> Result<Vec<Callback>> {
            if mode == ResolveMode::Invalid {
                self.rejected(handle, md, src, tag);
                return Ok(Vec::new());
            }
            let ops = match md.ops {
                Some(ops) => ops,
                None => TypeOps::lookup(tag)?,
            };
            if ops.tag() != tag {
                return Err(DirError::TypeMismatch {
                    handle,
                    expected: ops.name(),
                });
            }

            let next = match (md.state, mode) {
                (RemoteState::PendingRo, ResolveMode::ReadOnly) => {
                    ops.cm_create(&self.cache, handle, mode, &bytes)?;
                    RemoteState::HereRo
                },
                (RemoteState::PendingRw | RemoteState::Upgrade, ResolveMode::ReadWrite) => {
                    ops.cm_create(&self.cache, handle, mode, &bytes)?;
                    RemoteState::HereRw
                },
                (RemoteState::Upgrade, ResolveMode::UpgradeRw) => {
                    crate::protocol_assert!(
                        self.cache.make_rw(handle),
                        handle,
                        "upgrade granted with no cached copy"
                    );
                    RemoteState::HereRw
                },
                (state, mode) => crate::protocol_violation!(
                    handle,
                    "object {} from host {} arrived in state {}",
                    mode,
                    src,
                    state
                ),
            };
            self.transition(handle, md, next);

            if let Some(request) = self.outstanding.lock().remove(&handle) {
                self.ctx
                    .count(|stats| stats.record_fetch_latency(request.sent_at.elapsed()));
            }
            if let Some(wanted) = md.unsent.take() {
                self.request_access(handle, md, ops, wanted)?;
            }
            Ok(md.take_satisfied())
        });

        match fired {
            Some(fired) => self.ctx.fire(handle, fired?),
            None => crate::protocol_violation!(
                handle,
                "object from host {} but nothing was requested",
                src
            ),
        }
        Ok(())
    }

    /// Landing pad for a recall, forward or invalidation.
    pub fn recv_request(&self, message: RequestMessage) -> Result<()> {
        let RequestMessage {
            handle,
            whom,
            mode,
            tag,
        } = message;
        self.ctx.log(DirEvent::RequestReceived { handle, whom, mode });

        let answered = self.table.with(handle, false, |md| -> Result<()> {
            if let Some(ops) = md.ops {
                if ops.tag() != tag {
                    return Err(DirError::TypeMismatch {
                        handle,
                        expected: ops.name(),
                    });
                }
            }
            md.deferred.push_back(DeferredRecall { whom, mode });
            self.drain_deferred(handle, md)
        });

        match answered {
            Some(result) => result,
            None => crate::protocol_violation!(
                handle,
                "{} request for host {} but no copy was ever fetched",
                mode,
                whom
            ),
        }
    }

    /// Retry deferred recalls, then fetches that could not be sent yet.
    ///
    /// Every queued handle is retried; the first error is returned once
    /// all of them have had their turn.
    pub fn make_progress(&self) -> Result<()> {
        let mut handles: Vec<Handle> = std::mem::take(&mut *self.retry.lock())
            .into_iter()
            .collect();
        handles.sort();

        let mut first_error = None;
        for handle in handles {
            let fired = self.table.with(handle, false, |md| -> Result<Vec<Callback>> {
                self.drain_deferred(handle, md)?;
                if let Some(wanted) = md.unsent.take() {
                    if let Some(ops) = md.ops {
                        self.request_access(handle, md, ops, wanted)?;
                    }
                }
                Ok(md.take_satisfied())
            });
            match fired {
                Some(Ok(fired)) => self.ctx.fire(handle, fired),
                Some(Err(err)) => {
                    log::warn!("host {}: retry of {} failed: {}", self.ctx.me, handle, err);
                    first_error.get_or_insert(err);
                },
                None => {},
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for handle in self.table.handles() {
            let line = self.table.with(handle, false, |md| {
                format!(
                    "  remote {} {} contended={} waiters={} deferred={}\n",
                    handle,
                    md.state,
                    md.contended,
                    md.waiters.len(),
                    md.deferred.len()
                )
            });
            if let Some(line) = line {
                out.push_str(&line);
            }
        }
        for (handle, request) in self.outstanding.lock().iter() {
            out.push_str(&format!(
                "  outstanding {} {} -> host {}\n",
                handle, request.mode, request.dest
            ));
        }
        out
    }

    fn transition(&self, handle: Handle, md: &mut RequesterMeta, next: RemoteState) {
        if md.state != next {
            self.ctx.log(DirEvent::Transition {
                handle,
                from: md.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
            md.state = next;
        }
    }

    /// The owner refused a fetch: its object is of another type.
    fn rejected(&self, handle: Handle, md: &mut RequesterMeta, src: HostId, tag: TypeTag) {
        crate::protocol_assert!(
            md.state.is_pending(),
            handle,
            "rejection from host {} in state {}",
            src,
            md.state
        );
        let expected = type_name(tag);
        let asked = md.ops.map_or("an unknown type", |ops| ops.name());
        log::warn!(
            "host {}: owner {} rejected {} as {}, it holds {}",
            self.ctx.me,
            src,
            handle,
            asked,
            expected
        );
        self.ctx.log(DirEvent::Rejected {
            handle,
            host: src,
            expected: expected.to_string(),
        });
        self.outstanding.lock().remove(&handle);
        md.unsent = None;
        md.ops = None;
        md.owner_tag = Some(tag);
        self.transition(handle, md, RemoteState::Invalid);
    }

    fn request_access(
        &self,
        handle: Handle,
        md: &mut RequesterMeta,
        ops: &'static TypeOps,
        mode: ResolveMode,
    ) -> Result<()> {
        let wanted = mode.normalized();
        if md.state.satisfies(wanted) {
            return Ok(());
        }

        let (send, next) = match (md.state, wanted) {
            (RemoteState::Invalid, ResolveMode::ReadOnly) => {
                (ResolveMode::ReadOnly, RemoteState::PendingRo)
            },
            (RemoteState::Invalid, ResolveMode::ReadWrite) => {
                (ResolveMode::ReadWrite, RemoteState::PendingRw)
            },
            (RemoteState::HereRo, ResolveMode::ReadWrite) => {
                (ResolveMode::UpgradeRw, RemoteState::Upgrade)
            },
            (RemoteState::PendingRo, ResolveMode::ReadWrite) => {
                // Only one request may be in flight; ask again once the
                // read copy is here.
                md.unsent = Some(ResolveMode::ReadWrite);
                self.retry.lock().insert(handle);
                return Ok(());
            },
            // The answer is already on its way.
            _ => return Ok(()),
        };

        let owner = handle.host();
        {
            let mut outstanding = self.outstanding.lock();
            crate::protocol_assert!(
                !outstanding.contains_key(&handle),
                handle,
                "second request while {:?} is in flight",
                outstanding.get(&handle)
            );
            outstanding.insert(
                handle,
                Outstanding {
                    dest: owner,
                    mode: send,
                    sent_at: Instant::now(),
                },
            );
        }
        self.ctx.send_request(ops, owner, handle, self.ctx.me, send)?;
        self.transition(handle, md, next);
        Ok(())
    }

    /// Answer queued recalls in arrival order until one has to wait.
    fn drain_deferred(&self, handle: Handle, md: &mut RequesterMeta) -> Result<()> {
        while let Some(recall) = md.deferred.front().copied() {
            if !self.try_answer(handle, md, recall)? {
                self.retry.lock().insert(handle);
                self.ctx.count(|stats| stats.record_deferred_writeback());
                return Ok(());
            }
            md.deferred.pop_front();
        }
        Ok(())
    }

    /// Give up (or hand on) the local copy. Returns false if it must wait.
    fn try_answer(
        &self,
        handle: Handle,
        md: &mut RequesterMeta,
        recall: DeferredRecall,
    ) -> Result<bool> {
        match md.state {
            RemoteState::PendingRo | RemoteState::PendingRw => {
                self.ctx.deferred(handle, "copy still in flight");
                return Ok(false);
            },
            RemoteState::Invalid => crate::protocol_violation!(
                handle,
                "{} request for host {} but no copy is here",
                recall.mode,
                recall.whom
            ),
            RemoteState::HereRo | RemoteState::HereRw | RemoteState::Upgrade => {},
        }
        if md.holds_contended() {
            self.ctx.deferred(handle, "contended");
            return Ok(false);
        }

        let ops = md
            .ops
            .ok_or_else(|| DirError::Internal(format!("no type registered for {}", handle)))?;
        let Some(cell) = self.cache.resolve(handle, false) else {
            crate::protocol_violation!(handle, "state {} without a cached copy", md.state)
        };
        let Some(guard) = cell.try_lock() else {
            self.ctx.deferred(handle, "local use in progress");
            return Ok(false);
        };

        let owner = handle.host();
        let me = self.ctx.me;

        if md.state != RemoteState::HereRw {
            crate::protocol_assert!(
                recall.mode == ResolveMode::Invalid,
                handle,
                "reader asked to give up its copy for {}",
                recall.mode
            );
            drop(guard);
            self.cache.evict(handle);
            // Release acknowledgment; the owner drops us from its readers.
            self.ctx
                .send_request(ops, owner, handle, me, ResolveMode::Invalid)?;
            let next = if md.state == RemoteState::Upgrade {
                RemoteState::PendingRw
            } else {
                RemoteState::Invalid
            };
            self.transition(handle, md, next);
            return Ok(true);
        }

        let bytes = ops.encode(handle, &**guard)?;
        drop(guard);

        if recall.mode.wants_write() && recall.whom != owner {
            self.cache.evict(handle);
            self.ctx
                .send_object(ops, recall.whom, handle, bytes, ResolveMode::ReadWrite)?;
            self.transition(handle, md, RemoteState::Invalid);
        } else if recall.mode == ResolveMode::ReadOnly && self.ctx.config.downgrade_on_read_recall {
            self.cache.make_ro(handle);
            self.ctx
                .send_object(ops, owner, handle, bytes, ResolveMode::UpgradeRo)?;
            self.transition(handle, md, RemoteState::HereRo);
        } else {
            self.cache.evict(handle);
            self.ctx
                .send_object(ops, owner, handle, bytes, ResolveMode::Invalid)?;
            self.transition(handle, md, RemoteState::Invalid);
        }
        self.ctx.count(|stats| stats.record_writeback());
        Ok(true)
    }
}

fn type_name(tag: TypeTag) -> &'static str {
    TypeOps::lookup(tag).map_or("an unregistered type", |ops| ops.name())
}

fn bind_ops(
    handle: Handle,
    md: &mut RequesterMeta,
    ops: &'static TypeOps,
) -> Result<&'static TypeOps> {
    if let Some(tag) = md.owner_tag {
        if tag != ops.tag() {
            return Err(DirError::TypeMismatch {
                handle,
                expected: type_name(tag),
            });
        }
        md.owner_tag = None;
    }
    match md.ops {
        Some(bound) if bound.tag() != ops.tag() => Err(DirError::TypeMismatch {
            handle,
            expected: bound.name(),
        }),
        Some(bound) => Ok(bound),
        None => {
            md.ops = Some(ops);
            Ok(ops)
        },
    }
}
