//! # dsmc-dir - Coherence Directory for Distributed Shared Objects
//!
//! Gives every host of a distributed-memory cluster the illusion of
//! dereferencing objects that live on other hosts. Objects are named by a
//! [`Handle`] that encodes the owning host; this crate decides, per handle,
//! who holds a readable or writable copy, fetches copies on demand and
//! takes them back when another host needs exclusive access.
//!
//! ## Overview
//!
//! - **Single writer / multiple readers**: any number of read-only replicas,
//!   or exactly one writable copy
//! - **Owner-side directory**: the owning host arbitrates every handle it owns
//! - **Requester-side directory**: every other host runs a small state machine
//!   per cached handle
//! - **Non-blocking**: nothing waits on the network; callers register a
//!   callback or poll
//! - **Forwarding**: a writable copy moves between non-owners directly,
//!   never through the owner
//!
//! ## Quick Start
//!
//! ```rust
//! use dsmc_dir::{DirConfig, Host, LoopbackNetwork, ResolveMode};
//!
//! fn main() -> dsmc_dir::Result<()> {
//!     let net = LoopbackNetwork::build(2);
//!     let owner = Host::new(net[0].clone(), DirConfig::default())?;
//!     let reader = Host::new(net[1].clone(), DirConfig::default())?;
//!
//!     let counter = owner.allocate(41u64);
//!     reader.fetch::<u64>(counter, ResolveMode::ReadWrite)?;
//!
//!     while !reader.resolve(counter, ResolveMode::ReadWrite) {
//!         owner.do_network_work()?;
//!         reader.do_network_work()?;
//!     }
//!     reader.with_object(counter, ResolveMode::ReadWrite, |n: &mut u64| *n += 1)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  application threads                      polling thread
//!  fetch / notify / with_object             poll / make_progress
//!          │                                        │
//!          ▼                                        ▼
//! ┌──────────────────────────── Host ─────────────────────────────┐
//! │   handle owned here?                                          │
//! │      yes ──► OwnerDirectory ─────┐    ┌──── RequesterDirectory │
//! │              (ObjectStore)       │    │     (LocalCache)  ◄── no│
//! │                                  ▼    ▼                       │
//! │                        TypeOps (encode / decode / create)     │
//! │                                  │                            │
//! │                         Transport (send / try_recv)           │
//! └──────────────────────────────────┼────────────────────────────┘
//!                                    ▼
//!                           other hosts
//! ```
//!
//! ## Messages
//!
//! | Message | Fields | Meaning |
//! |---------|--------|---------|
//! | Request | handle, whom, mode | fetch, recall, forward, invalidate or release |
//! | Object  | handle, mode, bytes | copy delivered, upgrade granted, or writeback |
//!
//! ## Modules
//!
//! - [`cache`]: Home object store and local cache of remote copies
//! - [`config`]: Directory configuration and validation
//! - [`directory`]: Owner-side and requester-side directories
//! - [`error`]: Error types and protocol assertions
//! - [`logging`]: Protocol event log
//! - [`net`]: Transport trait, wire messages, loopback network
//! - [`runtime`]: The per-host entry point
//! - [`stats`]: Counters, latency histogram, metrics export
//! - [`typeops`]: Per-type dispatch records
//!
//! ## Limitations
//!
//! - **No fault tolerance**: hosts must not crash and messages must not be lost
//! - **No multi-object atomicity**: each handle is coherent on its own
//! - **Explicit polling**: a host that never polls stalls everyone waiting on it

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod net;
pub mod runtime;
pub mod stats;
pub mod typeops;

pub use cache::{LocalCache, ObjectCell, ObjectStore};
pub use config::{ConfigError, DirConfig};
pub use directory::{OwnerSnapshot, RemoteState};
pub use dsmc_util::{Handle, HostId, ResolveMode};
pub use error::{DirError, Result};
pub use logging::{DirEvent, DirLogger};
pub use net::{LoopbackEndpoint, LoopbackNetwork, Transport};
pub use runtime::Host;
pub use stats::{DirStats, DirSummary};
pub use typeops::{Transferable, TypeOps, TypeTag};

use std::sync::Arc;

/// dsmc-dir version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Start a host on `transport` with the default configuration.
///
/// # Examples
///
/// ```rust
/// let net = dsmc_dir::LoopbackNetwork::build(1);
/// let host = dsmc_dir::init(net[0].clone())?;
/// assert_eq!(host.id().0, 0);
/// # Ok::<(), dsmc_dir::DirError>(())
/// ```
pub fn init(transport: Arc<dyn Transport>) -> Result<Host> {
    Host::new(transport, DirConfig::default())
}

/// Start a host on `transport` with a custom configuration.
///
/// # Examples
///
/// ```rust
/// use dsmc_dir::DirConfig;
///
/// let config = DirConfig {
///     downgrade_on_read_recall: true,
///     ..Default::default()
/// };
/// let net = dsmc_dir::LoopbackNetwork::build(1);
/// let host = dsmc_dir::init_with_config(net[0].clone(), config)?;
/// assert!(host.config().downgrade_on_read_recall);
/// # Ok::<(), dsmc_dir::DirError>(())
/// ```
pub fn init_with_config(transport: Arc<dyn Transport>, config: DirConfig) -> Result<Host> {
    Host::new(transport, config)
}
