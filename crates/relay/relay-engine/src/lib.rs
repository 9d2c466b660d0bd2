//! `relay-engine`: routes request keys to backends through a doubly
//! buffered consistent-hash ring.
//!
//! The ring lives in a [`DoublyBuffered`] container: request threads resolve
//! backends through `read` (an uncontended per-thread lock), while backend
//! membership changes go through `modify` and pay the full publication
//! protocol. Each request thread additionally keeps a private [`PickTally`]
//! on its reader registration.

use std::sync::Arc;

use dbuf_core::{DoublyBuffered, ReadError};
use relay_core::{Backend, BackendId, HashRing};
use tracing::info;

/// Per-thread routing statistics, carried on the reader registration.
#[derive(Debug, Default)]
pub struct PickTally {
    /// Picks resolved by the owning thread.
    pub picks: u64,
}

pub struct RelayEngine {
    table: DoublyBuffered<HashRing, PickTally>,
    virtual_nodes: u32,
}

impl RelayEngine {
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            table: DoublyBuffered::new(),
            virtual_nodes,
        }
    }

    /// Adds a backend to the ring and publishes the new table.
    ///
    /// Returns the number of ring points added (`0` if the backend was
    /// already present, in which case nothing is published). The same
    /// `Arc<Backend>` lands in both table slots, so pick counters stay
    /// shared across publications.
    pub fn add_backend(&self, id: BackendId, weight: u32) -> usize {
        let backend = Arc::new(Backend::new(id, weight));
        let added = self
            .table
            .modify(|ring| ring.add_backend(&backend, self.virtual_nodes));
        if added > 0 {
            info!(id = id.0, weight, points = added, "backend added");
        }
        added
    }

    /// Removes a backend; returns the number of ring points removed.
    pub fn remove_backend(&self, id: BackendId) -> usize {
        let removed = self.table.modify(|ring| ring.remove_backend(id));
        if removed > 0 {
            info!(id = id.0, points = removed, "backend removed");
        }
        removed
    }

    /// Resolves the backend owning `key` and records the pick, both on the
    /// backend's shared counter and on the calling thread's tally.
    pub fn pick(&self, key: &str) -> Result<Option<Arc<Backend>>, ReadError> {
        let mut guard = self.table.read()?;
        let picked = guard.pick(key).cloned();
        if let Some(backend) = &picked {
            backend.record_pick();
            guard.tls().picks += 1;
        }
        Ok(picked)
    }

    /// The calling thread's pick tally so far.
    pub fn local_picks(&self) -> Result<u64, ReadError> {
        let mut guard = self.table.read()?;
        Ok(guard.tls().picks)
    }

    /// Snapshot of the distinct backends on the current ring.
    pub fn backends(&self) -> Result<Vec<Arc<Backend>>, ReadError> {
        Ok(self.table.read()?.backends())
    }

    /// Number of threads currently registered as readers of the table.
    pub fn reader_threads(&self) -> usize {
        self.table.reader_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pick_on_empty_table_is_none() {
        let engine = RelayEngine::new(8);
        assert!(engine.pick("user-1").unwrap().is_none());
    }

    #[test]
    fn picks_follow_membership_changes() {
        let engine = RelayEngine::new(8);
        assert!(engine.add_backend(BackendId(1), 1) > 0);
        // Double-add publishes nothing.
        assert_eq!(engine.add_backend(BackendId(1), 1), 0);

        let picked = engine.pick("user-1").unwrap().expect("ring is empty");
        assert_eq!(picked.id, BackendId(1));
        assert_eq!(picked.picks(), 1);

        assert!(engine.remove_backend(BackendId(1)) > 0);
        assert!(engine.pick("user-1").unwrap().is_none());
    }

    #[test]
    fn local_tally_counts_only_this_thread() {
        let engine = RelayEngine::new(8);
        engine.add_backend(BackendId(1), 1);

        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..10 {
                    engine.pick(&format!("user-{i}")).unwrap();
                }
                assert_eq!(engine.local_picks().unwrap(), 10);
            });
        });

        // This thread picked nothing.
        assert_eq!(engine.local_picks().unwrap(), 0);
    }
}
