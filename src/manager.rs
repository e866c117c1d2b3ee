use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use anyhow::{Context as _, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::peers::PeerVersions;
use crate::signal::{signal, Signal, SignalSource};
use crate::store::Replica;
use crate::sync::ReplyWaiters;
use crate::transport::{ClusterTransport, ConnId, Link};
use crate::types::{Lattice, PeerId, Tag, Version};
use crate::view::RootView;
use crate::wire::{self, Frame};

/// Upper bound on concurrently admitted outbound sends. Backpressure: when
/// the transport stalls, in-flight work stays bounded instead of fanning out
/// without limit on every local join.
const SEND_GATE_PERMITS: usize = 4;

/// Replication manager for one piece of cluster metadata.
///
/// One instance runs per node per tag. It owns the local replica and its
/// version counter, gossips deltas to every tracked connection, pushes a
/// full snapshot to each newly observed connection, and answers the sync
/// handshakes. Dropping the `Manager` (or calling [`Manager::shutdown`])
/// pulses the drain: spawned tasks abort cleanly and in-flight sync calls
/// fail over to their drain branches.
///
/// Must be constructed inside a tokio runtime; the constructor installs the
/// connection watcher before taking its first connection-set snapshot, so a
/// peer can never slip in unobserved between "manager exists" and "watcher
/// installed".
pub struct Manager<V, T: ClusterTransport> {
    pub(crate) inner: Arc<Inner<V, T>>,
}

/// Inbound frame handle for the transport's read callback. Holds the
/// manager weakly: frames arriving after teardown are dropped silently.
pub struct Ingress<V, T: ClusterTransport> {
    inner: Weak<Inner<V, T>>,
}

impl<V, T: ClusterTransport> Clone for Ingress<V, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

/// Point-in-time introspection snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManagerStatus {
    pub version: Version,
    pub tracked_connections: usize,
    pub peers: Vec<PeerSeen>,
}

/// Highest version ingested from one peer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PeerSeen {
    pub peer: PeerId,
    pub last_version_seen: Version,
}

pub(crate) struct Inner<V, T: ClusterTransport> {
    pub(crate) transport: Arc<T>,
    tag: Tag,
    replica: RwLock<Replica<V>>,
    /// Connections we have begun tracking, i.e. sent our initial snapshot
    /// to and not yet observed tearing down.
    tracked: Mutex<HashMap<ConnId, Link>>,
    pub(crate) peer_versions: Mutex<PeerVersions>,
    pub(crate) sync_from: Mutex<ReplyWaiters<Version>>,
    pub(crate) sync_to: Mutex<ReplyWaiters<()>>,
    send_gate: Semaphore,
    drain: SignalSource,
    pub(crate) drained: Signal,
}

impl<V, T> Manager<V, T>
where
    V: Lattice + Serialize + DeserializeOwned,
    T: ClusterTransport,
{
    pub fn new(transport: Arc<T>, tag: Tag, initial: V) -> Self {
        let (drain, drained) = signal();
        // Subscribe to connection-set changes before the first snapshot so
        // no connection can appear between the two unobserved.
        let changes = transport.watch_links();
        let inner = Arc::new(Inner {
            transport,
            tag,
            replica: RwLock::new(Replica::new(initial)),
            tracked: Mutex::new(HashMap::new()),
            peer_versions: Mutex::new(PeerVersions::default()),
            sync_from: Mutex::new(ReplyWaiters::default()),
            sync_to: Mutex::new(ReplyWaiters::default()),
            send_gate: Semaphore::new(SEND_GATE_PERMITS),
            drain,
            drained,
        });

        tokio::spawn(run_connection_watcher(Arc::downgrade(&inner), changes));
        Self { inner }
    }

    /// Public handle onto this manager. Valid until the manager is dropped;
    /// calls after that return `ManagerGone`.
    pub fn root_view(&self) -> RootView<V, T> {
        RootView::new(Arc::downgrade(&self.inner))
    }

    /// Handle for wiring the transport's inbound frame callback.
    pub fn ingress(&self) -> Ingress<V, T> {
        Ingress {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn status(&self) -> ManagerStatus {
        self.inner.status()
    }

    /// Pulse the drain without dropping the manager. In-flight sync calls
    /// fail with `SyncFailed`; spawned tasks wind down.
    pub fn shutdown(&self) {
        self.inner.drain.pulse();
    }
}

impl<V, T: ClusterTransport> Drop for Manager<V, T> {
    fn drop(&mut self) {
        self.inner.drain.pulse();
    }
}

impl<V, T> Ingress<V, T>
where
    V: Lattice + Serialize + DeserializeOwned,
    T: ClusterTransport,
{
    /// Feed one inbound frame received on the replication tag.
    ///
    /// An error here is a fatal protocol violation (unknown opcode, decode
    /// failure): the transport is trusted to deliver intact frames, so the
    /// embedder should treat the connection or process as broken rather
    /// than skip the frame.
    pub fn ingest(&self, from: &Link, frame: &[u8]) -> Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.ingest(from, frame),
            None => Ok(()),
        }
    }
}

impl<V, T> Inner<V, T>
where
    V: Lattice + Serialize + DeserializeOwned,
    T: ClusterTransport,
{
    pub(crate) fn replica(&self) -> RwLockReadGuard<'_, Replica<V>> {
        self.replica.read().expect("replica lock poisoned")
    }

    fn replica_mut(&self) -> RwLockWriteGuard<'_, Replica<V>> {
        self.replica.write().expect("replica lock poisoned")
    }

    fn conns(&self) -> MutexGuard<'_, HashMap<ConnId, Link>> {
        self.tracked.lock().expect("connection table lock poisoned")
    }

    pub(crate) fn peers(&self) -> MutexGuard<'_, PeerVersions> {
        self.peer_versions.lock().expect("peer version lock poisoned")
    }

    pub(crate) fn snapshot(&self) -> V {
        self.replica().snapshot()
    }

    pub(crate) fn local_version(&self) -> Version {
        self.replica().version()
    }

    pub(crate) fn subscribe(&self, callback: impl Fn(&V) + Send + Sync + 'static) {
        self.replica_mut().subscribe(callback);
    }

    /// Merge `delta` into the local replica and broadcast it.
    ///
    /// The version is minted before any network work, and the local apply
    /// (including subscriber notification) completes under the write lock
    /// before the first send task spawns. Concurrent joins mint distinct,
    /// strictly increasing versions; their on-wire arrival order at any
    /// given peer is unconstrained, which the join algebra makes safe.
    pub(crate) fn join(self: &Arc<Self>, delta: V) -> Version {
        let version = {
            let mut replica = self.replica_mut();
            let version = replica.bump();
            replica.join_locally(delta.clone());
            version
        };

        let links: Vec<Link> = self.conns().values().cloned().collect();
        debug!(version, fanout = links.len(), "broadcasting local join");
        for link in links {
            self.spawn_send(
                link,
                Frame::Metadata {
                    delta: delta.clone(),
                    version,
                },
            );
        }
        version
    }

    pub(crate) fn status(&self) -> ManagerStatus {
        let mut peers: Vec<PeerSeen> = self
            .peers()
            .peers_seen()
            .map(|(peer, last_version_seen)| PeerSeen {
                peer,
                last_version_seen,
            })
            .collect();
        peers.sort_by_key(|seen| seen.peer);

        ManagerStatus {
            version: self.local_version(),
            tracked_connections: self.conns().len(),
            peers,
        }
    }

    /// Spawn one gated send task. Transport write failures end the task
    /// with a warning; the originating sync call, if any, learns of the
    /// loss through its connection drain.
    pub(crate) fn spawn_send(self: &Arc<Self>, link: Link, frame: Frame<V>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut drained = inner.drained.clone();
            let mut conn_drained = link.drained.clone();
            let permit = tokio::select! {
                permit = inner.send_gate.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = drained.fired() => return,
                _ = conn_drained.fired() => return,
            };

            let bytes = match wire::encode(link.cluster, &frame) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(peer = link.peer, %err, "failed to encode outbound frame");
                    return;
                }
            };
            if let Err(err) = inner.transport.send(&link, inner.tag, bytes).await {
                warn!(peer = link.peer, conn = link.conn.0, %err, "transport write failed");
            }
            drop(permit);
        });
    }

    /// Inbound dispatcher: route one decoded frame to its handler.
    pub(crate) fn ingest(self: &Arc<Self>, from: &Link, frame: &[u8]) -> Result<()> {
        let frame = wire::decode::<V>(from.cluster, frame)
            .with_context(|| format!("replication frame from peer {}", from.peer))?;

        match frame {
            Frame::Metadata { delta, version } => self.on_metadata(from.peer, delta, version),
            Frame::SyncFromQuery { qid } => self.on_sync_from_query(from, qid),
            Frame::SyncFromReply { qid, version } => self.on_sync_from_reply(from.peer, qid, version),
            Frame::SyncToQuery { qid, version } => self.on_sync_to_query(from, qid, version),
            Frame::SyncToReply { qid } => self.on_sync_to_reply(from.peer, qid),
        }
        Ok(())
    }

    fn on_metadata(&self, sender: PeerId, delta: V, change_version: Version) {
        self.replica_mut().join_locally(delta);
        let seen = self.peers().record(sender, change_version);
        debug!(sender, change_version, seen, "ingested metadata broadcast");
    }

    fn on_sync_from_query(self: &Arc<Self>, from: &Link, qid: u64) {
        let version = self.local_version();
        self.spawn_send(from.clone(), Frame::SyncFromReply { qid, version });
    }

    fn on_sync_from_reply(&self, sender: PeerId, qid: u64, version: Version) {
        use crate::sync::Resolution;
        let outcome = self
            .sync_from
            .lock()
            .expect("sync-from waiter lock poisoned")
            .resolve(qid, version);
        match outcome {
            Resolution::Delivered => {}
            Resolution::Duplicate => {
                warn!(sender, qid, "duplicate sync-from reply; dropping");
            }
            Resolution::Expired => {
                debug!(sender, qid, "sync-from reply for cancelled waiter");
            }
        }
    }

    /// Answer once we have ingested the requester's `required_version`. On
    /// drain, answer nothing: the requester detects the loss through its
    /// own connection drain.
    fn on_sync_to_query(self: &Arc<Self>, from: &Link, qid: u64, required_version: Version) {
        let inner = Arc::clone(self);
        let link = from.clone();
        tokio::spawn(async move {
            if inner
                .wait_for_version_from_peer(link.peer, required_version, Signal::never())
                .await
                .is_ok()
            {
                inner.spawn_send(link, Frame::SyncToReply { qid });
            }
        });
    }

    fn on_sync_to_reply(&self, sender: PeerId, qid: u64) {
        use crate::sync::Resolution;
        let outcome = self
            .sync_to
            .lock()
            .expect("sync-to waiter lock poisoned")
            .resolve(qid, ());
        match outcome {
            Resolution::Delivered => {}
            Resolution::Duplicate => {
                warn!(sender, qid, "duplicate sync-to reply; dropping");
            }
            Resolution::Expired => {
                debug!(sender, qid, "sync-to reply for cancelled waiter");
            }
        }
    }

    /// Reconcile the tracked-connection table with the transport's current
    /// set: start tracking new connections (pushing a full snapshot), stop
    /// tracking ones that disappeared.
    fn refresh_links(self: &Arc<Self>) {
        let live = self.transport.links();
        let mut tracked = self.conns();

        tracked.retain(|conn, _| live.iter().any(|link| link.conn == *conn));

        for link in live {
            if tracked.contains_key(&link.conn) {
                continue;
            }
            tracked.insert(link.conn, link.clone());

            // Initial snapshot: full current value on the metadata opcode.
            // The receiver joins it in like any delta; idempotence makes
            // snapshot and delta indistinguishable on the wire.
            let (value, version) = {
                let replica = self.replica();
                (replica.snapshot(), replica.version())
            };
            debug!(peer = link.peer, conn = link.conn.0, version, "tracking new connection");
            self.spawn_send(
                link,
                Frame::Metadata {
                    delta: value,
                    version,
                },
            );
        }
    }
}

/// Connection watcher: re-snapshot the connection set on every change
/// signal. Holds the manager weakly so the manager's own task cannot keep
/// it alive; exits on manager drain.
async fn run_connection_watcher<V, T>(
    inner: Weak<Inner<V, T>>,
    mut changes: watch::Receiver<u64>,
) where
    V: Lattice + Serialize + DeserializeOwned,
    T: ClusterTransport,
{
    let mut drained = match inner.upgrade() {
        Some(inner) => {
            inner.refresh_links();
            inner.drained.clone()
        }
        None => return,
    };

    loop {
        tokio::select! {
            _ = drained.fired() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(inner) = inner.upgrade() else { break };
                inner.refresh_links();
            }
        }
    }
}
