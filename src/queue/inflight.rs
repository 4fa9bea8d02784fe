//! Set of keys admitted to the queue and not yet released.

use dashmap::DashSet;

/// Concurrent admission gate keyed by dedup key.
///
/// A key is present from a successful [`InFlightSet::try_admit`] until the
/// matching [`InFlightSet::release`].
#[derive(Debug, Default)]
pub struct InFlightSet {
    keys: DashSet<String>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert `key` if absent. Returns false if it was already held.
    pub fn try_admit(&self, key: &str) -> bool {
        self.keys.insert(key.to_string())
    }

    /// Remove `key`. Releasing an absent key is a no-op.
    pub fn release(&self, key: &str) {
        self.keys.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn second_admit_is_rejected_until_release() {
        let set = InFlightSet::new();
        assert!(set.try_admit("net1-client1"));
        assert!(!set.try_admit("net1-client1"));
        assert!(set.try_admit("net1-client2"));

        set.release("net1-client1");
        assert!(set.try_admit("net1-client1"));
    }

    #[test]
    fn release_is_idempotent() {
        let set = InFlightSet::new();
        set.release("missing");
        assert!(set.try_admit("a"));
        set.release("a");
        set.release("a");
        assert!(set.is_empty());
    }

    #[test]
    fn exactly_one_concurrent_admit_wins() {
        let set = Arc::new(InFlightSet::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let set = Arc::clone(&set);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if set.try_admit("contended") {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }
}
