//! joinmesh - eventually consistent cluster metadata over a join-semilattice
//!
//! joinmesh replicates one piece of cluster-wide metadata across all peers of
//! a cluster, on top of a messaging transport you already have. The value
//! domain is a bounded join-semilattice: any two values have a least upper
//! bound, and the merge is commutative, associative, and idempotent. That is
//! the entire consistency story, so updates can arrive in any order, any
//! number of times, and every replica still converges.
//!
//! # Key features
//!
//! - **Peer-to-peer**: every node runs the same [`Manager`]; no leader, no
//!   coordinator, no minimum cluster size
//! - **Delta gossip**: a local [`RootView::join`] broadcasts only the delta;
//!   newly connected peers receive a full snapshot on the same wire path
//! - **Sync handshakes**: [`RootView::sync_to`] waits until a peer has seen
//!   your latest version, [`RootView::sync_from`] waits until you have seen
//!   theirs
//! - **Bounded fan-out**: all outbound sends pass a fixed-capacity gate, so
//!   a stalled transport bounds in-flight work instead of growing it
//! - **Transport-agnostic**: core only - you provide the network layer via
//!   [`ClusterTransport`] and feed inbound frames through [`Ingress`]
//!
//! # Quick start
//!
//! ```ignore
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use joinmesh::{Manager, Signal};
//!
//! // `transport` implements joinmesh::ClusterTransport
//! let manager = Manager::new(Arc::new(transport), 0x4D, BTreeSet::new());
//! let view = manager.root_view();
//!
//! view.join(BTreeSet::from(["feature-x".to_string()]))?;
//! view.sync_to(peer, Signal::never()).await?;
//! // `peer` now holds a value that includes "feature-x"
//! ```
//!
//! # Non-goals
//!
//! joinmesh intentionally does NOT provide:
//! - Strong consistency or linearizability
//! - Leader election or membership management
//! - Persistence
//! - Conflict resolution beyond `join` (the value type IS the resolution)
//! - A network transport layer

pub mod error;
pub mod manager;
pub mod signal;
pub mod transport;
pub mod types;
pub mod view;
pub mod wire;

mod peers;
mod store;
mod sync;

pub use error::SyncError;
pub use manager::{Ingress, Manager, ManagerStatus, PeerSeen};
pub use signal::{signal, Signal, SignalSource};
pub use transport::{ClusterTransport, ConnId, Link};
pub use types::{ClusterVersion, Lattice, Max, PeerId, Tag, Version};
pub use view::RootView;
