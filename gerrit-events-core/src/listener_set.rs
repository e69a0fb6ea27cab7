//! Copy-on-write listener collection
//!
//! Listeners are compared by identity (the address of their allocation),
//! never by value, so registering the same instance twice is detected while
//! two equal-looking listeners can coexist. Readers iterate a snapshot
//! without taking a lock; add and remove swap in a new snapshot.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Identity-keyed set of shared listeners
pub struct ListenerSet<L: ?Sized> {
    snapshot: ArcSwap<Vec<Arc<L>>>,
    writer: Mutex<()>,
}

fn same_instance<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    /// Add a listener; returns `false` if this instance is already registered
    pub fn add(&self, listener: Arc<L>) -> bool {
        let _guard = self.writer.lock();
        let current = self.snapshot.load();
        if current.iter().any(|existing| same_instance(existing, &listener)) {
            return false;
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(listener);
        self.snapshot.store(Arc::new(next));
        true
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let _guard = self.writer.lock();
        let current = self.snapshot.load();
        if !current.iter().any(|existing| same_instance(existing, listener)) {
            return false;
        }

        let next: Vec<Arc<L>> = current
            .iter()
            .filter(|existing| !same_instance(*existing, listener))
            .cloned()
            .collect();
        self.snapshot.store(Arc::new(next));
        true
    }

    /// Remove every listener, returning the previous set
    pub fn remove_all(&self) -> Vec<Arc<L>> {
        let _guard = self.writer.lock();
        let previous = self.snapshot.swap(Arc::new(Vec::new()));
        previous.iter().cloned().collect()
    }

    /// Whether this exact instance is registered
    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.snapshot
            .load()
            .iter()
            .any(|existing| same_instance(existing, listener))
    }

    /// Current listeners; unaffected by later add/remove calls
    pub fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}
