//! dsmc-util - Foundation Types for the Distributed Object Directory
//!
//! ============================================================================
//! MODULE OVERVIEW
//! ============================================================================
//!
//! Every crate in the workspace addresses shared objects through the same
//! small set of value types defined here:
//!
//! - [`HostId`]: the rank of a host in the cluster.
//! - [`Handle`]: a fat pointer `(owning host, slot)` naming one object
//!   anywhere in the cluster. The slot is only meaningful on the owner.
//! - [`ResolveMode`]: the access mode a message asks for or delivers.
//! - [`SlotAllocator`]: hands out fresh slots for objects a host owns.
//!
//! DESIGN PRINCIPLES:
//! ------------------
//! 1. PURE VALUES
//!    Handles and modes are `Copy` and compare by value. A handle never
//!    changes after creation, so it can key any table on any host.
//!
//! 2. WIRE FRIENDLY
//!    All types derive serde so they travel inside protocol messages
//!    without hand-written codecs.
//
// ============================================================================
// FAT POINTERS
// ============================================================================
//
// A handle joins the owner-side and requester-side tables:
//
// ```
// Handle (16 bytes):
// ┌──────────────┬──────────────────────────┐
// │  host (u32)  │        slot (u64)        │
// └──────────────┴──────────────────────────┘
//        │                    │
//        │                    └── valid only inside the owner's object store
//        └── decides which directory role a host plays for the object
// ```
//
// On the owning host the handle is "local" and the owner-side directory
// keeps its metadata; everywhere else it is "remote" and the requester-side
// directory tracks the cached copy.

pub mod error;
pub mod handle;
pub mod mode;
pub mod slot;

pub use error::{HandleError, HandleResult};
pub use handle::{Handle, HostId};
pub use mode::ResolveMode;
pub use slot::SlotAllocator;

/// Hash map keyed by handles and host ids.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// Hash set keyed by handles and host ids.
pub type FxHashSet<K> = rustc_hash::FxHashSet<K>;
