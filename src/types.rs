use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Peer identity as assigned by the cluster transport.
pub type PeerId = u64;

/// Monotonic broadcast counter, local to one manager. Versions minted by
/// different nodes are not comparable.
pub type Version = u64;

/// Message tag a manager binds on the transport.
pub type Tag = u8;

/// Wire-codec revision negotiated by the transport at connection setup and
/// passed into every frame encode/decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterVersion(pub u32);

impl ClusterVersion {
    pub const V1: ClusterVersion = ClusterVersion(1);
}

impl std::fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Bounded join-semilattice value.
///
/// `join` must be commutative, associative, and idempotent: replicas may
/// apply the same delta any number of times, in any interleaving, and still
/// converge. That algebra is the whole conflict-resolution story; there is
/// no other reconciliation step anywhere in the crate.
pub trait Lattice: Clone + Send + Sync + 'static {
    /// Mutate `self` to the least upper bound of `self` and `other`.
    fn join(&mut self, other: Self);
}

/// Set union.
impl<T> Lattice for BTreeSet<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    fn join(&mut self, other: Self) {
        self.extend(other);
    }
}

/// Pointwise join: keys union, values join.
impl<K, V> Lattice for BTreeMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Lattice,
{
    fn join(&mut self, other: Self) {
        for (key, value) in other {
            match self.entry(key) {
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    slot.get_mut().join(value);
                }
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(value);
                }
            }
        }
    }
}

/// Maximum of a totally ordered value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Max<T>(pub T);

impl<T> Lattice for Max<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    fn join(&mut self, other: Self) {
        if other.0 > self.0 {
            self.0 = other.0;
        }
    }
}
