use std::sync::atomic::{AtomicU64, Ordering};

// BackendId is stable across config reloads; it is the identity hashed onto
// the ring, so renumbering backends reshuffles key ownership.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BackendId(pub u16);

/// One upstream server.
///
/// The pick counter is shared by every ring point referring to this backend
/// and by both slots of the published table (the ring stores `Arc<Backend>`),
/// so a pick recorded through either slot lands on the same counter.
#[derive(Debug)]
pub struct Backend {
    pub id: BackendId,
    pub weight: u32,
    picks: AtomicU64,
}

impl Backend {
    pub fn new(id: BackendId, weight: u32) -> Self {
        Self {
            id,
            weight,
            picks: AtomicU64::new(0),
        }
    }

    /// Count one routed request. Relaxed: the counter is statistics, not
    /// synchronization.
    #[inline]
    pub fn record_pick(&self) {
        self.picks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn picks(&self) -> u64 {
        self.picks.load(Ordering::Relaxed)
    }

    /// Read and reset the counter, for periodic distribution reports.
    pub fn take_picks(&self) -> u64 {
        self.picks.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_picks_resets() {
        let b = Backend::new(BackendId(3), 1);
        b.record_pick();
        b.record_pick();
        assert_eq!(b.take_picks(), 2);
        assert_eq!(b.picks(), 0);
    }
}
