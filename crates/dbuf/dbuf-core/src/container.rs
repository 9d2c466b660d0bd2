//! The doubly buffered container and its publish/drain protocol.
//!
//! # Protocol
//!
//! **Reader:**
//! 1. Lock this thread's private reader lock (registering it on first use)
//! 2. Acquire-load the foreground index
//! 3. Hand out `&T` into that slot for the guard's lifetime
//! 4. Unlock on guard drop
//!
//! **Writer (serialized by the writer mutex):**
//! 1. Relaxed-load the index; the other slot is the background
//! 2. Apply the closure to the background slot; result 0 means "nothing
//!    changed" and the write stops here
//! 3. Publish: release-store the background index as the new foreground
//! 4. Drain: lock and unlock every registered reader lock once, waiting out
//!    reads that started before the flip
//! 5. Apply the closure to the former foreground so both slots converge
//!
//! # Memory Ordering
//!
//! Three orderings carry the whole protocol: the writer's own index load is
//! `Relaxed` (the writer mutex already orders writers), the publish store is
//! `Release`, the reader load is `Acquire`. The release/acquire pair makes
//! every write from step 2 visible to any reader that observes the new
//! index. Readers that miss the flip keep reading the old foreground, which
//! the writer will not touch until the drain has waited them out.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::guard::ReadGuard;
use crate::reader::{self, ReadError, Registry};

/// Doubly buffered data: one logical value, two storage slots, reads that
/// cost an uncontended lock and writes that pay for everyone.
///
/// `T` is the published value. `U` is optional per-thread user data carried
/// on each reader registration and reachable through
/// [`ReadGuard::tls`](crate::ReadGuard::tls); it is outside the publish
/// protocol entirely.
///
/// # Thread Safety
///
/// The container is `Sync`: any number of threads may call [`read`] while
/// others call [`modify`]. Writers exclude each other; readers exclude
/// nobody except the brief, empty lock/unlock a writer performs on their
/// private lock during its drain.
///
/// A reader thread may hold at most one guard per container at a time. The
/// reader lock is not recursive; nesting [`read`] on the same container on
/// the same thread deadlocks.
///
/// # Writer closures
///
/// The closure passed to [`modify`] runs once per slot, so it must be
/// deterministic on equivalent inputs: same logical change, same returned
/// count. Closures that consult clocks, randomness, or other external state
/// silently diverge the two slots. Closures must not re-enter this
/// container ([`modify`] would self-deadlock on the writer mutex, [`read`]
/// on the caller's own reader lock).
///
/// [`read`]: DoublyBuffered::read
/// [`modify`]: DoublyBuffered::modify
pub struct DoublyBuffered<T, U = ()> {
    /// Foreground and background value storage.
    slots: [UnsafeCell<T>; 2],
    /// Index of the foreground slot in `slots`.
    fg_index: AtomicUsize,
    /// Registered reader records, one per thread that has read this
    /// container. Shared so thread-exit destructors can find it (weakly)
    /// after the container is gone.
    registry: Arc<Registry<U>>,
    /// Serializes writers. Separate from the registry lock so a slow modify
    /// does not block threads registering or deregistering readers.
    writer_lock: Mutex<()>,
    /// Process-unique id keying this container's thread-local registrations.
    id: u64,
}

// SAFETY: readers on many threads share `&T` into the foreground slot
// (hence T: Sync), while the protocol hands the background slot to exactly
// one writer at a time on an arbitrary thread (hence T: Send). `U` values
// are mutated only by their registering thread but may be dropped by
// whichever thread releases the last reference (hence U: Send).
unsafe impl<T: Send + Sync, U: Send> Sync for DoublyBuffered<T, U> {}
unsafe impl<T: Send, U: Send> Send for DoublyBuffered<T, U> {}

impl<T: Default, U> DoublyBuffered<T, U> {
    /// Creates a container with both slots default-constructed.
    ///
    /// A `read` before the first effective `modify` observes `T::default()`,
    /// so scalar-like and pointer-like payloads start at a defined zero/none
    /// state rather than garbage.
    pub fn new() -> Self {
        Self {
            slots: [
                UnsafeCell::new(T::default()),
                UnsafeCell::new(T::default()),
            ],
            fg_index: AtomicUsize::new(0),
            registry: Arc::new(Registry::new()),
            writer_lock: Mutex::new(()),
            id: reader::next_container_id(),
        }
    }
}

impl<T: Default, U> Default for DoublyBuffered<T, U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, U> DoublyBuffered<T, U> {
    /// Opens a read critical section on the foreground slot.
    ///
    /// The first call from a thread registers it (one small allocation, one
    /// registry push); every later call is a private lock acquisition plus
    /// one atomic load. Reads are never blocked by other readers, and by a
    /// writer only for the instant the writer's drain holds this thread's
    /// lock with an empty critical section.
    ///
    /// # Errors
    ///
    /// Fails only when the calling thread's local storage is already being
    /// torn down (reads from `Drop` impls running at thread exit).
    pub fn read(&self) -> Result<ReadGuard<'_, T, U>, ReadError>
    where
        U: Default + Send + 'static,
    {
        let slot = reader::thread_slot(self.id, &self.registry)?;
        // SAFETY: the slot is kept alive by this thread's registration
        // table, which releases it only at thread exit or when its registry
        // is dead; our registry is alive for at least the guard's lifetime
        // because the guard borrows `self`, and the guard is !Send so it
        // cannot outlive the thread.
        let slot = unsafe { slot.as_ref() };

        slot.begin_read();
        // Pairs with the release store in `apply`: observing the new index
        // implies observing the closure's writes to that slot.
        let fg = self.fg_index.load(Ordering::Acquire);
        // SAFETY: `slots[fg]` was foreground at the load. A writer flips the
        // index before mutating an old foreground, and between the flip and
        // the mutation it drains our (already held) reader lock, so the slot
        // cannot be written while this guard exists.
        let data = unsafe { &*self.slots[fg].get() };
        Ok(ReadGuard::new(data, slot))
    }

    /// Applies `f` to both slots with a publication flip in between and
    /// returns the second application's result.
    ///
    /// `f` reports the magnitude of the change it made (conventionally the
    /// number of items touched); returning `0` from the first application
    /// aborts the write with no publication and no drain. See the type-level
    /// docs for the determinism and reentrancy requirements on `f`.
    pub fn modify<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut T) -> usize,
    {
        self.apply(&mut f)
    }

    /// Like [`modify`], but `f` also receives the opposite slot read-only.
    ///
    /// During the first application the second argument is the current
    /// foreground; during the second it is the *new* foreground written
    /// moments ago. This lets a writer derive the next value from the
    /// previous one without snapshotting it first. Note that convergence of
    /// the two slots is then up to `f`: a closure like `bg = other + 1`
    /// advances on every application and leaves the slots one step apart by
    /// design.
    ///
    /// [`modify`]: DoublyBuffered::modify
    pub fn modify_with_foreground<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut T, &T) -> usize,
    {
        let slot0: *const T = self.slots[0].get();
        self.apply(&mut |bg: &mut T| {
            // The slot not being written: slots[1] when `bg` is slots[0],
            // slots[0] otherwise.
            let bg_ptr: *const T = bg;
            let other_idx = (bg_ptr == slot0) as usize;
            // SAFETY: `other` is the slot the protocol currently exposes
            // read-only (foreground in phase 2, the freshly published
            // foreground in phase 5); readers alias it with `&T` only.
            let other = unsafe { &*self.slots[other_idx].get() };
            f(bg, other)
        })
    }

    /// Number of live reader registrations.
    ///
    /// Grows on each new reading thread, shrinks as those threads exit. A
    /// writer's drain cost is linear in this number.
    pub fn reader_count(&self) -> usize {
        self.registry.reader_count()
    }

    /// The five-phase write protocol shared by [`modify`] and
    /// [`modify_with_foreground`].
    ///
    /// [`modify`]: DoublyBuffered::modify
    /// [`modify_with_foreground`]: DoublyBuffered::modify_with_foreground
    fn apply(&self, f: &mut dyn FnMut(&mut T) -> usize) -> usize {
        let _writer = self.writer_lock.lock();

        // Phase 1: select the background slot. Relaxed is enough: only
        // writers store this index and they are ordered by `writer_lock`.
        let bg = 1 - self.fg_index.load(Ordering::Relaxed);

        // Phase 2: mutate the background.
        // SAFETY: no reader dereferences a non-foreground slot and
        // `writer_lock` admits one writer, so this `&mut` is unique.
        let first = f(unsafe { &mut *self.slots[bg].get() });
        if first == 0 {
            return 0;
        }

        // Phase 3: publish. The release store pairs with the acquire load
        // in `read`.
        self.fg_index.store(bg, Ordering::Release);
        let bg = 1 - bg;

        // Phase 4: wait until every read critical section that began before
        // the flip has ended. Readers arriving after the flip already see
        // the new foreground and may overlap this drain freely.
        self.registry.drain_readers();

        // Phase 5: the former foreground is now unreachable; apply the same
        // change so both slots converge.
        // SAFETY: post-drain, no live guard points into this slot, and new
        // readers resolve the published index.
        let second = f(unsafe { &mut *self.slots[bg].get() });
        if second != first {
            // Both slots are already written at this point; unequal results
            // mean the closure is not deterministic on equivalent inputs
            // and the slots may now disagree.
            warn!(
                first,
                second, "modify closure returned inconsistent results across slots"
            );
        }
        second
    }
}
