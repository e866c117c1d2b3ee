use std::future::Future;

use anyhow::Result;
use tokio::sync::watch;

use crate::signal::Signal;
use crate::types::{ClusterVersion, PeerId, Tag};

/// Identity of one live connection. A reconnect to the same peer yields a
/// fresh id, so per-connection bookkeeping never confuses the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

/// Connection handle plus keepalive.
///
/// While any clone of a `Link` is held, the underlying connection object
/// stays valid, and `drained` fires exactly once when the transport tears
/// the connection down. No component touches a connection except through a
/// held `Link`.
#[derive(Debug, Clone)]
pub struct Link {
    pub conn: ConnId,
    pub peer: PeerId,
    /// Codec revision negotiated for this connection.
    pub cluster: ClusterVersion,
    /// Fires when the connection is being torn down.
    pub drained: Signal,
}

/// The cluster messaging transport consumed by the manager.
///
/// The transport owns peer identity, the connection set, and framed
/// delivery; this crate only ever sees it through these four methods. FIFO
/// delivery is assumed per `(connection, tag)` pair, and frames are assumed
/// intact (the transport is integrity-checked).
pub trait ClusterTransport: Send + Sync + 'static {
    /// Snapshot of the current connection set.
    fn links(&self) -> Vec<Link>;

    /// Change signal for the connection set. The value is a generation
    /// counter; observers re-snapshot via [`ClusterTransport::links`] on
    /// each change.
    fn watch_links(&self) -> watch::Receiver<u64>;

    /// Link for `peer`, if currently connected.
    fn link_to(&self, peer: PeerId) -> Option<Link>;

    /// Write one frame on `tag` over `link`.
    fn send(
        &self,
        link: &Link,
        tag: Tag,
        frame: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}
