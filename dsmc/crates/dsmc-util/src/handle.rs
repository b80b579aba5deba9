use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use static_assertions::{assert_eq_size, assert_impl_all};

use crate::error::{HandleError, HandleResult};

/// Rank of a host in the cluster.
///
/// Host ids are dense, starting at 0. Ordering matters: the owner-side
/// directory serves queued requesters lowest id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u32);

impl HostId {
    /// Reserved id that never names a real host
    pub const INVALID: HostId = HostId(u32::MAX);

    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for HostId {
    fn from(id: u32) -> Self {
        HostId(id)
    }
}

/// Fat pointer naming one object anywhere in the cluster.
///
/// The `host` component names the owner. The `slot` is only meaningful in
/// the owner's object store; every other host treats it as an opaque key.
///
/// # Example
///
/// ```
/// use dsmc_util::{Handle, HostId};
///
/// let h = Handle::new(HostId(2), 17);
/// assert!(h.is_local(HostId(2)));
/// assert!(!h.is_local(HostId(0)));
/// assert_eq!(h.to_string(), "2:17");
/// assert_eq!("2:17".parse::<Handle>().unwrap(), h);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Handle {
    host: HostId,
    slot: u64,
}

assert_eq_size!(Handle, [u64; 2]);
assert_impl_all!(Handle: Send, Sync, Copy);

impl Handle {
    pub const fn new(host: HostId, slot: u64) -> Self {
        Self { host, slot }
    }

    /// Owning host
    pub fn host(self) -> HostId {
        self.host
    }

    /// Owner-local slot
    pub fn slot(self) -> u64 {
        self.slot
    }

    /// True when `me` owns the object
    pub fn is_local(self, me: HostId) -> bool {
        self.host == me
    }

    /// Same slot re-homed on another host
    pub fn with_host(self, host: HostId) -> Self {
        Self { host, ..self }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.slot)
    }
}

impl FromStr for Handle {
    type Err = HandleError;

    fn from_str(s: &str) -> HandleResult<Self> {
        let (host, slot) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| HandleError::Malformed(s.to_string()))?;

        let host: u32 = host
            .parse()
            .map_err(|_| HandleError::Malformed(s.to_string()))?;
        let slot: u64 = slot
            .parse()
            .map_err(|_| HandleError::Malformed(s.to_string()))?;

        if HostId(host).is_invalid() {
            return Err(HandleError::InvalidHost { host });
        }

        Ok(Handle::new(HostId(host), slot))
    }
}
