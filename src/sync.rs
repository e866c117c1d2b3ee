//! Sync handshakes: bound a caller's uncertainty about what a peer has seen
//! relative to local state, or vice versa.
//!
//! Both handshakes are correlated request/reply exchanges keyed by an opaque
//! query id. Every wait races completion against the peer's connection
//! drain, the manager drain, and the caller's interruptor; waiter entries
//! are guard-owned so they are removed on every exit path, including
//! cancellation of the calling future.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::SyncError;
use crate::manager::Inner;
use crate::peers::PeerVersions;
use crate::signal::Signal;
use crate::transport::ClusterTransport;
use crate::types::{Lattice, PeerId, Version};
use crate::wire::Frame;

enum PendingReply<R> {
    Waiting(oneshot::Sender<R>),
    /// Reply delivered; tombstone kept until the waiter's guard cleans up
    /// so a second reply for the same id is recognizable as a duplicate.
    Fired,
}

pub(crate) enum Resolution {
    Delivered,
    Duplicate,
    Expired,
}

/// Query-id mint plus the reply waiters for one handshake direction.
pub(crate) struct ReplyWaiters<R> {
    next_id: u64,
    pending: HashMap<u64, PendingReply<R>>,
}

impl<R> Default for ReplyWaiters<R> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }
}

impl<R> ReplyWaiters<R> {
    pub fn register(&mut self) -> (u64, oneshot::Receiver<R>) {
        let qid = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(qid, PendingReply::Waiting(tx));
        (qid, rx)
    }

    pub fn resolve(&mut self, qid: u64, value: R) -> Resolution {
        match self.pending.entry(qid) {
            Entry::Occupied(mut slot) => {
                match std::mem::replace(slot.get_mut(), PendingReply::Fired) {
                    PendingReply::Waiting(tx) => {
                        // A send error means the waiter is already exiting;
                        // its guard will sweep the tombstone.
                        let _ = tx.send(value);
                        Resolution::Delivered
                    }
                    PendingReply::Fired => Resolution::Duplicate,
                }
            }
            Entry::Vacant(_) => Resolution::Expired,
        }
    }

    pub fn remove(&mut self, qid: u64) {
        self.pending.remove(&qid);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Removes a reply waiter on scope exit.
struct ReplyGuard<'a, R> {
    waiters: &'a Mutex<ReplyWaiters<R>>,
    qid: u64,
}

impl<R> Drop for ReplyGuard<'_, R> {
    fn drop(&mut self) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(self.qid);
        }
    }
}

/// Removes a version waiter on scope exit.
struct VersionWaiterGuard<'a> {
    peers: &'a Mutex<PeerVersions>,
    id: u64,
}

impl Drop for VersionWaiterGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.unregister(self.id);
        }
    }
}

impl<V, T> Inner<V, T>
where
    V: Lattice + Serialize + DeserializeOwned,
    T: ClusterTransport,
{
    /// Catch the local replica up to whatever `peer` had at the moment it
    /// received our query.
    ///
    /// Returns after the local replica has absorbed at least that version.
    /// FIFO delivery per connection guarantees the broadcasts carrying it
    /// were sent before the reply, so they are ingested by the time the
    /// version wait clears.
    #[tracing::instrument(skip(self, interrupt))]
    pub(crate) async fn sync_from(
        self: &Arc<Self>,
        peer: PeerId,
        interrupt: Signal,
    ) -> Result<(), SyncError> {
        let link = self
            .transport
            .link_to(peer)
            .ok_or(SyncError::SyncFailed(peer))?;

        let (qid, rx) = self
            .sync_from
            .lock()
            .expect("sync-from waiter lock poisoned")
            .register();
        let _guard = ReplyGuard {
            waiters: &self.sync_from,
            qid,
        };

        self.spawn_send(link.clone(), Frame::SyncFromQuery { qid });

        let mut conn_drained = link.drained.clone();
        let mut drained = self.drained.clone();
        let mut interrupted = interrupt.clone();
        let peer_version = tokio::select! {
            reply = rx => reply.map_err(|_| SyncError::SyncFailed(peer))?,
            _ = conn_drained.fired() => return Err(SyncError::SyncFailed(peer)),
            _ = drained.fired() => return Err(SyncError::SyncFailed(peer)),
            _ = interrupted.fired() => return Err(SyncError::Interrupted),
        };

        debug!(peer, peer_version, "sync-from reply received");
        self.wait_for_version_from_peer(peer, peer_version, interrupt)
            .await
    }

    /// Ensure `peer` has absorbed at least our current local version.
    #[tracing::instrument(skip(self, interrupt))]
    pub(crate) async fn sync_to(
        self: &Arc<Self>,
        peer: PeerId,
        interrupt: Signal,
    ) -> Result<(), SyncError> {
        let link = self
            .transport
            .link_to(peer)
            .ok_or(SyncError::SyncFailed(peer))?;

        let version = self.local_version();
        let (qid, rx) = self
            .sync_to
            .lock()
            .expect("sync-to waiter lock poisoned")
            .register();
        let _guard = ReplyGuard {
            waiters: &self.sync_to,
            qid,
        };

        self.spawn_send(link.clone(), Frame::SyncToQuery { qid, version });

        let mut conn_drained = link.drained.clone();
        let mut drained = self.drained.clone();
        let mut interrupted = interrupt;
        tokio::select! {
            reply = rx => reply.map_err(|_| SyncError::SyncFailed(peer)),
            _ = conn_drained.fired() => Err(SyncError::SyncFailed(peer)),
            _ = drained.fired() => Err(SyncError::SyncFailed(peer)),
            _ = interrupted.fired() => Err(SyncError::Interrupted),
        }
    }

    /// Block until `last_versions_seen[peer] >= version`, fed by incoming
    /// metadata broadcasts from that peer.
    ///
    /// The waiter is registered under the same lock acquisition as the
    /// fast-path check, so an incoming broadcast cannot advance the table
    /// in between and leave the waiter stranded.
    pub(crate) async fn wait_for_version_from_peer(
        &self,
        peer: PeerId,
        version: Version,
        mut interrupt: Signal,
    ) -> Result<(), SyncError> {
        let (waiter_id, mut satisfied, link) = {
            let mut peers = self.peers();
            if peers.seen(peer) >= version {
                return Ok(());
            }
            let link = self
                .transport
                .link_to(peer)
                .ok_or(SyncError::SyncFailed(peer))?;
            let (waiter_id, satisfied) = peers.register(peer, version);
            (waiter_id, satisfied, link)
        };
        let _guard = VersionWaiterGuard {
            peers: &self.peer_versions,
            id: waiter_id,
        };

        let mut conn_drained = link.drained.clone();
        let mut drained = self.drained.clone();
        tokio::select! {
            _ = satisfied.fired() => Ok(()),
            _ = conn_drained.fired() => Err(SyncError::SyncFailed(peer)),
            _ = drained.fired() => Err(SyncError::SyncFailed(peer)),
            _ = interrupt.fired() => Err(SyncError::Interrupted),
        }
    }
}
