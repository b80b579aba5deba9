use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use dsmc_util::HostId;

use super::{Envelope, HandlerId, Transport};
use crate::error::{DirError, Result};

/// Builder for an in-process cluster.
pub struct LoopbackNetwork;

impl LoopbackNetwork {
    /// One connected endpoint per host, indexed by host id.
    pub fn build(num_hosts: u32) -> Vec<Arc<LoopbackEndpoint>> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..num_hosts).map(|_| unbounded()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(index, receiver)| {
                Arc::new(LoopbackEndpoint {
                    id: HostId(index as u32),
                    peers: senders.clone(),
                    inbox: receiver,
                    sent: AtomicU64::new(0),
                })
            })
            .collect()
    }
}

/// A host's view of the loopback network.
///
/// Each host owns one unbounded channel; a single channel per receiver
/// keeps every sender's messages in order.
pub struct LoopbackEndpoint {
    id: HostId,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    sent: AtomicU64,
}

impl LoopbackEndpoint {
    /// Messages this endpoint has sent.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Transport for LoopbackEndpoint {
    fn id(&self) -> HostId {
        self.id
    }

    fn num_hosts(&self) -> u32 {
        self.peers.len() as u32
    }

    fn send(&self, dest: HostId, handler: HandlerId, body: Vec<u8>) -> Result<()> {
        let peer = self.peers.get(dest.index()).ok_or(DirError::UnknownHost {
            host: dest,
            num_hosts: self.num_hosts(),
        })?;
        let envelope = Envelope {
            src: self.id,
            dest,
            handler,
            body,
        };
        peer.send(envelope)
            .map_err(|_| DirError::Disconnected { host: dest })?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn try_recv(&self) -> Result<Option<Envelope>> {
        match self.inbox.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(DirError::Disconnected { host: self.id }),
        }
    }

    fn queued(&self) -> usize {
        self.inbox.len()
    }
}
