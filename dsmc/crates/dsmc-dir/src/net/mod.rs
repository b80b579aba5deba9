//! Network transport
//!
//! The directory only needs reliable delivery with FIFO order per
//! sender/receiver pair, and makes progress only when the host polls.
//! [`Transport`] is that contract; [`LoopbackNetwork`] implements it with
//! in-process channels so a whole cluster can run inside one process.

mod loopback;
mod message;

pub use loopback::{LoopbackEndpoint, LoopbackNetwork};
pub use message::{ObjectMessage, RequestMessage};

use dsmc_util::HostId;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Landing pad an envelope is dispatched to on the receiving host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HandlerId {
    /// Body is an [`ObjectMessage`]
    Object = 1,
    /// Body is a [`RequestMessage`]
    Request = 2,
}

/// One message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub src: HostId,
    pub dest: HostId,
    pub handler: HandlerId,
    pub body: Vec<u8>,
}

/// Point-to-point message delivery between the hosts of a cluster.
pub trait Transport: Send + Sync {
    /// This endpoint's host.
    fn id(&self) -> HostId;

    fn num_hosts(&self) -> u32;

    /// Queue `body` for delivery to `dest`'s `handler`.
    fn send(&self, dest: HostId, handler: HandlerId, body: Vec<u8>) -> Result<()>;

    /// Send to every other host.
    fn broadcast(&self, handler: HandlerId, body: Vec<u8>) -> Result<()> {
        let me = self.id();
        for host in (0..self.num_hosts()).map(HostId) {
            if host != me {
                self.send(host, handler, body.clone())?;
            }
        }
        Ok(())
    }

    /// Next inbound envelope, if any. Never blocks.
    fn try_recv(&self) -> Result<Option<Envelope>>;

    /// Inbound envelopes waiting to be received.
    fn queued(&self) -> usize;
}
