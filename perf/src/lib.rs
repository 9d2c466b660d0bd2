//! Shared fixtures for the dbuf benchmarks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use dbuf_core::DoublyBuffered;
use relay_core::{Backend, BackendId, HashRing};

/// A populated consistent-hash ring.
pub fn build_ring(backends: u16, virtual_nodes: u32) -> HashRing {
    let mut ring = HashRing::default();
    for id in 1..=backends {
        ring.add_backend(&Arc::new(Backend::new(BackendId(id), 1)), virtual_nodes);
    }
    ring
}

/// Keeps `count` threads registered as readers of a table until dropped.
///
/// Each thread performs one read to register, then idles. None of them hold
/// a guard, so what a concurrent `modify` pays per thread is exactly the
/// drain's lock/unlock of an uncontended reader lock, the quantity the
/// modify benchmarks sweep over.
pub struct IdleReaders {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl IdleReaders {
    pub fn spawn(table: &Arc<DoublyBuffered<u64>>, count: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handles = (0..count)
            .map(|_| {
                let table = Arc::clone(table);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    drop(table.read().expect("read failed"));
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
            })
            .collect();

        // Block until every thread has registered, so the benchmark body
        // sees a stable reader count from its first iteration.
        while table.reader_count() < count {
            std::thread::yield_now();
        }

        Self { stop, handles }
    }
}

impl Drop for IdleReaders {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
