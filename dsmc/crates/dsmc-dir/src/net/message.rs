use dsmc_util::{Handle, HostId, ResolveMode};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::typeops::TypeTag;

/// Object bytes travelling to a requester, a forward target or the owner.
///
/// `bytes` is empty for an in-place upgrade grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMessage {
    pub handle: Handle,
    pub mode: ResolveMode,
    pub tag: TypeTag,
    pub bytes: Vec<u8>,
}

/// A request for access, a recall, or a release acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub handle: Handle,
    /// Host the request is made on behalf of
    pub whom: HostId,
    pub mode: ResolveMode,
    pub tag: TypeTag,
}

impl ObjectMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

impl RequestMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}
