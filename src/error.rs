use thiserror::Error;

use crate::types::PeerId;

/// Failure modes surfaced by the public `RootView` operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The caller's interrupt signal fired while the operation was waiting.
    #[error("sync interrupted by caller")]
    Interrupted,

    /// The target peer was not connected at call time, or its connection
    /// drained before the handshake completed.
    #[error("sync with peer {0} failed: peer unreachable")]
    SyncFailed(PeerId),

    /// The owning manager has been torn down.
    #[error("replication manager is gone")]
    ManagerGone,
}
