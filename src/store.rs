use crate::types::{Lattice, Version};

type Subscriber<V> = Box<dyn Fn(&V) + Send + Sync>;

/// Local replica: current value, version counter, change subscribers.
///
/// Lives behind the manager's write lock; every mutation happens under that
/// guard, so subscribers observe local versions in mint order and each
/// application fully completes before the next begins.
pub(crate) struct Replica<V> {
    value: V,
    version: Version,
    subscribers: Vec<Subscriber<V>>,
}

impl<V: Lattice> Replica<V> {
    pub fn new(initial: V) -> Self {
        Self {
            value: initial,
            version: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> V {
        self.value.clone()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Mint the version for a locally originated change. Strictly greater
    /// than every version this node has broadcast before.
    pub fn bump(&mut self) -> Version {
        self.version += 1;
        self.version
    }

    /// Join `delta` into the replica and notify subscribers.
    pub fn join_locally(&mut self, delta: V) {
        self.value.join(delta);
        for subscriber in &self.subscribers {
            subscriber(&self.value);
        }
    }

    pub fn subscribe(&mut self, callback: impl Fn(&V) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(callback));
    }
}
