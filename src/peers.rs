use std::collections::HashMap;

use crate::signal::{signal, Signal, SignalSource};
use crate::types::{PeerId, Version};

struct VersionWaiter {
    id: u64,
    peer: PeerId,
    version: Version,
    fire: SignalSource,
}

/// Tracks the highest version ingested from each peer, and wakes waiters
/// when a peer's version advances past their threshold.
///
/// Lives behind a mutex that is always released before suspension; waiter
/// registration happens under the same guard as the fast-path check, so an
/// incoming broadcast can never advance the table between the check and the
/// registration.
#[derive(Default)]
pub(crate) struct PeerVersions {
    seen: HashMap<PeerId, Version>,
    waiters: Vec<VersionWaiter>,
    next_waiter: u64,
}

impl PeerVersions {
    pub fn seen(&self, peer: PeerId) -> Version {
        self.seen.get(&peer).copied().unwrap_or(0)
    }

    /// Record a version ingested from `peer` and fire every waiter whose
    /// threshold is now met. Returns the peer's (monotonic) high-water mark.
    pub fn record(&mut self, peer: PeerId, version: Version) -> Version {
        let seen = self.seen.entry(peer).or_insert(0);
        *seen = (*seen).max(version);
        let seen = *seen;

        self.waiters.retain(|waiter| {
            if waiter.peer == peer && waiter.version <= seen {
                waiter.fire.pulse();
                false
            } else {
                true
            }
        });
        seen
    }

    /// Register a waiter for `seen(peer) >= version`. The caller must have
    /// checked the fast path under the same lock acquisition.
    pub fn register(&mut self, peer: PeerId, version: Version) -> (u64, Signal) {
        let id = self.next_waiter;
        self.next_waiter += 1;
        let (fire, fired) = signal();
        self.waiters.push(VersionWaiter {
            id,
            peer,
            version,
            fire,
        });
        (id, fired)
    }

    /// Remove a waiter that exited without firing. A no-op if `record`
    /// already consumed it.
    pub fn unregister(&mut self, id: u64) {
        self.waiters.retain(|waiter| waiter.id != id);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn peers_seen(&self) -> impl Iterator<Item = (PeerId, Version)> + '_ {
        self.seen.iter().map(|(&peer, &version)| (peer, version))
    }
}
