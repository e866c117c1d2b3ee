use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SyncError;
use crate::manager::{Inner, ManagerStatus};
use crate::signal::Signal;
use crate::transport::ClusterTransport;
use crate::types::{Lattice, PeerId, Version};

/// Public handle onto a [`crate::Manager`].
///
/// Holds the manager weakly: every call upgrades first and returns
/// [`SyncError::ManagerGone`] once the manager has been dropped. Cheap to
/// clone and safe to hand out across the process.
pub struct RootView<V, T: ClusterTransport> {
    inner: Weak<Inner<V, T>>,
}

impl<V, T: ClusterTransport> Clone for RootView<V, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<V, T> RootView<V, T>
where
    V: Lattice + Serialize + DeserializeOwned,
    T: ClusterTransport,
{
    pub(crate) fn new(inner: Weak<Inner<V, T>>) -> Self {
        Self { inner }
    }

    fn manager(&self) -> Result<Arc<Inner<V, T>>, SyncError> {
        self.inner.upgrade().ok_or(SyncError::ManagerGone)
    }

    /// Snapshot copy of the current value.
    pub fn get(&self) -> Result<V, SyncError> {
        Ok(self.manager()?.snapshot())
    }

    /// Current local version.
    pub fn version(&self) -> Result<Version, SyncError> {
        Ok(self.manager()?.local_version())
    }

    /// Merge `delta` into local state and broadcast it to every tracked
    /// connection. Returns the version minted for this change.
    pub fn join(&self, delta: V) -> Result<Version, SyncError> {
        Ok(self.manager()?.join(delta))
    }

    /// Register a callback invoked after every successful local apply,
    /// locally originated or ingested. Callbacks observe local versions in
    /// mint order and must not block.
    pub fn subscribe(
        &self,
        callback: impl Fn(&V) + Send + Sync + 'static,
    ) -> Result<(), SyncError> {
        self.manager()?.subscribe(callback);
        Ok(())
    }

    /// Catch the local replica up to what `peer` has right now.
    pub async fn sync_from(&self, peer: PeerId, interrupt: Signal) -> Result<(), SyncError> {
        self.manager()?.sync_from(peer, interrupt).await
    }

    /// Wait until `peer` has absorbed our current local version.
    pub async fn sync_to(&self, peer: PeerId, interrupt: Signal) -> Result<(), SyncError> {
        self.manager()?.sync_to(peer, interrupt).await
    }

    pub fn status(&self) -> Result<ManagerStatus, SyncError> {
        Ok(self.manager()?.status())
    }
}
