//! Per-thread reader registration.
//!
//! Every thread that reads a container gets a [`ReaderSlot`]: a private mutex
//! (the reader lock) plus an instance of the container's user data type. The
//! container keeps all slots in a [`Registry`] so a writer can enumerate them
//! during its drain phase; each thread keeps its slots in a thread-local
//! table so they can be found again on the next read and torn down when the
//! thread exits.
//!
//! # Ownership
//!
//! ```text
//!   container ──owns──▶ Arc<Registry> ──strong──▶ Arc<ReaderSlot> (per thread)
//!                            ▲                          ▲
//!                          Weak                       strong
//!                            │                          │
//!                  thread-local Registration ───────────┘
//! ```
//!
//! The thread-local side holds the registry only weakly. When the container
//! is dropped it takes the sole strong registry reference with it, so a
//! thread exiting later finds the upgrade failing and skips deregistration.
//! When a thread exits first, its `Registration` drop runs, upgrades the
//! registry and removes the slot, so writers stop draining a lock nobody
//! will ever hold again.

use std::any::Any;
use std::cell::{RefCell, UnsafeCell};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};
use tracing::debug;

/// Registry capacity reserved up front. Sized for the common case of one
/// reader slot per request-serving thread.
const RESERVED_READERS: usize = 64;

/// Process-unique container ids, used to key thread-local registrations.
/// Never reused, so a stale table entry can never be mistaken for a live
/// container.
static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_container_id() -> u64 {
    NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Failure modes of [`DoublyBuffered::read`](crate::DoublyBuffered::read).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReadError {
    /// The calling thread's local storage is being torn down (the thread is
    /// exiting), so no registration can be created or found.
    #[error("thread-local storage unavailable: thread is shutting down")]
    ThreadStorageUnavailable,
}

/// One reading thread's registration record for one container.
///
/// The lock is uncontended in steady state: only the owning thread takes it
/// on its read path, and a writer takes it exactly once per modification,
/// with an empty critical section, during the drain phase.
pub(crate) struct ReaderSlot<U> {
    /// The reader lock. Raw rather than guard-based because begin-read and
    /// end-read straddle the [`ReadGuard`](crate::ReadGuard) object instead
    /// of a lexical scope.
    lock: RawMutex,
    /// User data riding along with the registration. Not protected by the
    /// container protocol; only the owning thread touches it.
    user: UnsafeCell<U>,
}

// SAFETY: `lock` is a mutex and synchronizes itself. `user` is only accessed
// through `user_data`, whose contract restricts access to the registering
// thread while it holds the (unique, non-recursive) reader lock. `U: Send`
// because the last owner to drop the slot may be another thread.
unsafe impl<U: Send> Sync for ReaderSlot<U> {}
unsafe impl<U: Send> Send for ReaderSlot<U> {}

impl<U: Default> ReaderSlot<U> {
    fn new() -> Self {
        Self {
            lock: RawMutex::INIT,
            user: UnsafeCell::new(U::default()),
        }
    }
}

impl<U> ReaderSlot<U> {
    /// Enter a read critical section.
    #[inline(always)]
    pub(crate) fn begin_read(&self) {
        self.lock.lock();
    }

    /// Leave the read critical section.
    ///
    /// # Safety
    /// Must be paired with exactly one preceding [`begin_read`] on the same
    /// thread.
    ///
    /// [`begin_read`]: ReaderSlot::begin_read
    #[inline(always)]
    pub(crate) unsafe fn end_read(&self) {
        // SAFETY: per the caller contract this thread holds the lock.
        unsafe { self.lock.unlock() };
    }

    /// Acquire and immediately release the reader lock.
    ///
    /// Used by the writer drain: returning means any read critical section
    /// that was open when the call started has finished. The critical
    /// section here is empty, which is what keeps readers "almost lock-free"
    /// from their point of view.
    #[inline]
    pub(crate) fn wait_read_done(&self) {
        self.lock.lock();
        // SAFETY: locked on the previous line.
        unsafe { self.lock.unlock() };
    }

    /// Raw pointer to the per-thread user data.
    ///
    /// # Safety
    /// Only the registering thread may dereference the result, and only
    /// while it can prove exclusive access (in practice: through the unique
    /// outstanding `ReadGuard` for this container on this thread).
    pub(crate) unsafe fn user_data(&self) -> *mut U {
        self.user.get()
    }
}

/// All reader registrations for one container.
pub(crate) struct Registry<U> {
    /// Guarded against concurrent registration, deregistration, and the
    /// writer's drain iteration.
    readers: Mutex<Vec<Arc<ReaderSlot<U>>>>,
}

impl<U> Registry<U> {
    pub(crate) fn new() -> Self {
        Self {
            readers: Mutex::new(Vec::with_capacity(RESERVED_READERS)),
        }
    }

    fn register(&self, container_id: u64) -> Arc<ReaderSlot<U>>
    where
        U: Default,
    {
        let slot = Arc::new(ReaderSlot::new());
        let mut readers = self.readers.lock();
        readers.push(Arc::clone(&slot));
        debug!(container_id, readers = readers.len(), "reader registered");
        slot
    }

    fn deregister(&self, slot: &Arc<ReaderSlot<U>>) {
        let mut readers = self.readers.lock();
        if let Some(i) = readers.iter().position(|s| Arc::ptr_eq(s, slot)) {
            readers.swap_remove(i);
        }
    }

    /// Acquire and release every registered reader lock once.
    ///
    /// Holding the registry lock for the whole pass also stalls registration
    /// of brand-new readers until the drain finishes; a reader admitted
    /// afterwards synchronizes through this mutex and is guaranteed to load
    /// the published foreground index.
    pub(crate) fn drain_readers(&self) {
        let readers = self.readers.lock();
        for slot in readers.iter() {
            slot.wait_read_done();
        }
    }

    pub(crate) fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }
}

/// Type-erased view of a thread-local registration, so registrations for
/// containers of different `U` can share one table.
trait AnyRegistration {
    fn container_id(&self) -> u64;
    /// Whether the owning container still exists.
    fn attached(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// A thread's registration with one container. Dropping it (thread exit, or
/// pruning after the container died) removes the slot from the registry if
/// the registry is still alive.
struct Registration<U: 'static> {
    container_id: u64,
    slot: Arc<ReaderSlot<U>>,
    registry: Weak<Registry<U>>,
}

impl<U: Send + 'static> AnyRegistration for Registration<U> {
    fn container_id(&self) -> u64 {
        self.container_id
    }

    fn attached(&self) -> bool {
        self.registry.strong_count() > 0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<U: 'static> Drop for Registration<U> {
    fn drop(&mut self) {
        // Container already gone: its registry died with it and took our
        // slot's registry reference along, nothing to remove.
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(&self.slot);
        }
    }
}

thread_local! {
    /// This thread's registrations, one per container it has read from.
    ///
    /// A flat vector with linear scan, not a map: a thread registers with a
    /// handful of containers at most, and at that size a scan over
    /// contiguous entries beats hashing. Dropping the vector at thread exit
    /// is the deregistration hook.
    static REGISTRATIONS: RefCell<Vec<Box<dyn AnyRegistration>>> = const { RefCell::new(Vec::new()) };
}

/// Find or create the calling thread's reader slot for the given container.
///
/// The returned pointer stays valid for as long as both the thread and the
/// registry are alive: the thread-local table owns a strong reference that
/// is only released at thread exit or when pruning registrations of dead
/// containers, and this container is demonstrably not dead.
pub(crate) fn thread_slot<U>(
    container_id: u64,
    registry: &Arc<Registry<U>>,
) -> Result<NonNull<ReaderSlot<U>>, ReadError>
where
    U: Default + Send + 'static,
{
    REGISTRATIONS
        .try_with(|table| {
            let mut table = table.borrow_mut();
            if let Some(reg) = table.iter().find(|r| r.container_id() == container_id) {
                let reg = reg
                    .as_any()
                    .downcast_ref::<Registration<U>>()
                    .expect("container id bound to a registration of another type");
                return NonNull::from(&*reg.slot);
            }

            // First read from this thread. Registration is the cold path, so
            // also sweep out entries whose container has since been dropped;
            // their slots are freed here rather than at thread exit.
            table.retain(|r| r.attached());

            let slot = registry.register(container_id);
            let ptr = NonNull::from(&*slot);
            table.push(Box::new(Registration {
                container_id,
                slot,
                registry: Arc::downgrade(registry),
            }));
            ptr
        })
        .map_err(|_| ReadError::ThreadStorageUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_deregister_leaves_registry_empty() {
        let registry: Arc<Registry<()>> = Arc::new(Registry::new());
        let slot = registry.register(0);
        assert_eq!(registry.reader_count(), 1);
        registry.deregister(&slot);
        assert_eq!(registry.reader_count(), 0);
    }

    #[test]
    fn deregister_of_unknown_slot_is_a_no_op() {
        let registry: Arc<Registry<()>> = Arc::new(Registry::new());
        let registered = registry.register(0);
        let stranger = Arc::new(ReaderSlot::<()>::new());
        registry.deregister(&stranger);
        assert_eq!(registry.reader_count(), 1);
        registry.deregister(&registered);
        assert_eq!(registry.reader_count(), 0);
    }

    #[test]
    fn wait_read_done_returns_with_no_reader_inside() {
        let slot = ReaderSlot::<()>::new();
        // No critical section open: must not block.
        slot.wait_read_done();
        slot.begin_read();
        // SAFETY: paired with the begin_read above.
        unsafe { slot.end_read() };
        slot.wait_read_done();
    }

    #[test]
    fn registration_drop_detaches_from_a_dead_registry() {
        let registry: Arc<Registry<u32>> = Arc::new(Registry::new());
        let reg = Registration {
            container_id: 99,
            slot: registry.register(99),
            registry: Arc::downgrade(&registry),
        };
        drop(registry);
        // Upgrade fails inside Drop; must not panic.
        drop(reg);
    }
}
