//! Consistent-hash ring over the backend set.
//!
//! Each backend is materialized as `virtual_nodes` points on a `u64` ring so
//! load spreads evenly and removing one backend only reassigns the keys that
//! hashed to its points. Lookup walks clockwise: the first point at or after
//! the key's hash owns the key, wrapping to the lowest point past the top.
//!
//! Every operation is deterministic in its inputs: the ring is published
//! through a doubly buffered container whose write protocol applies the same
//! mutation to two copies and requires them to converge.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::backend::{Backend, BackendId};

#[derive(Debug, Default)]
pub struct HashRing {
    points: BTreeMap<u64, Arc<Backend>>,
}

impl HashRing {
    /// Inserts `virtual_nodes` points for the backend.
    ///
    /// Returns the number of points actually added, which is `0` when the
    /// backend was already present with the same replica count. Callers
    /// feed this straight into the published table's modify protocol, where
    /// `0` means "skip publication".
    pub fn add_backend(&mut self, backend: &Arc<Backend>, virtual_nodes: u32) -> usize {
        let mut added = 0;
        for replica in 0..virtual_nodes {
            let point = hash_point(backend.id, replica);
            // entry(), not insert(): an occupied point keeps its existing
            // backend handle, so reporting 0 really does mean "untouched".
            self.points.entry(point).or_insert_with(|| {
                added += 1;
                Arc::clone(backend)
            });
        }
        added
    }

    /// Removes every point belonging to the backend; returns how many.
    pub fn remove_backend(&mut self, id: BackendId) -> usize {
        let before = self.points.len();
        self.points.retain(|_, b| b.id != id);
        before - self.points.len()
    }

    /// The backend owning `key`, or `None` on an empty ring.
    pub fn pick(&self, key: &str) -> Option<&Arc<Backend>> {
        let point = hash_key(key);
        self.points
            .range(point..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, backend)| backend)
    }

    /// Distinct backends currently on the ring, ordered by id.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        let mut by_id: BTreeMap<BackendId, Arc<Backend>> = BTreeMap::new();
        for backend in self.points.values() {
            by_id.entry(backend.id).or_insert_with(|| Arc::clone(backend));
        }
        by_id.into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total ring points (backends × their virtual nodes).
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

// DefaultHasher::new() is fixed-key SipHash: stable within and across
// processes, which keeps ring layout reproducible for a given config.
fn hash_point(id: BackendId, replica: u32) -> u64 {
    let mut h = DefaultHasher::new();
    id.0.hash(&mut h);
    replica.hash(&mut h);
    h.finish()
}

fn hash_key(key: &str) -> u64 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VNODES: u32 = 16;

    fn backend(id: u16) -> Arc<Backend> {
        Arc::new(Backend::new(BackendId(id), 1))
    }

    #[test]
    fn empty_ring_picks_nothing() {
        let ring = HashRing::default();
        assert!(ring.pick("user-1").is_none());
    }

    #[test]
    fn add_and_remove_report_point_counts() {
        let mut ring = HashRing::default();
        let b = backend(1);
        assert_eq!(ring.add_backend(&b, VNODES), VNODES as usize);
        // Re-adding the same backend changes nothing.
        assert_eq!(ring.add_backend(&b, VNODES), 0);
        assert_eq!(ring.remove_backend(BackendId(1)), VNODES as usize);
        assert!(ring.is_empty());
    }

    #[test]
    fn pick_is_stable_for_a_fixed_ring() {
        let mut ring = HashRing::default();
        for id in 1..=4 {
            ring.add_backend(&backend(id), VNODES);
        }
        let first = ring.pick("user-42").unwrap().id;
        for _ in 0..10 {
            assert_eq!(ring.pick("user-42").unwrap().id, first);
        }
    }

    #[test]
    fn removing_a_backend_only_moves_its_keys() {
        let mut ring = HashRing::default();
        for id in 1..=4 {
            ring.add_backend(&backend(id), VNODES);
        }

        let keys: Vec<String> = (0..200).map(|i| format!("user-{i}")).collect();
        let owners: Vec<BackendId> = keys.iter().map(|k| ring.pick(k).unwrap().id).collect();

        ring.remove_backend(BackendId(3));

        for (key, owner) in keys.iter().zip(&owners) {
            let now = ring.pick(key).unwrap().id;
            if *owner != BackendId(3) {
                assert_eq!(now, *owner, "key {key} moved off a surviving backend");
            } else {
                assert_ne!(now, BackendId(3));
            }
        }
    }

    #[test]
    fn all_backends_receive_some_keys() {
        let mut ring = HashRing::default();
        for id in 1..=4 {
            ring.add_backend(&backend(id), 32);
        }
        let mut hit = [false; 5];
        for i in 0..1000 {
            let id = ring.pick(&format!("user-{i}")).unwrap().id;
            hit[id.0 as usize] = true;
        }
        assert!(hit[1..=4].iter().all(|&h| h), "a backend received no keys");
    }
}
