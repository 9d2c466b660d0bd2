//! Scoped read access to the foreground slot.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

use crate::reader::ReaderSlot;

/// A read critical section over one container.
///
/// While the guard is alive the pointed-to value is frozen: a concurrent
/// writer can publish a new foreground, but it cannot touch the slot this
/// guard observes until the guard is dropped. Dropping the guard releases
/// the calling thread's reader lock.
///
/// The guard is `!Send` and `!Sync`: the reader lock belongs to the thread
/// that took it and must be released there.
pub struct ReadGuard<'a, T, U = ()> {
    data: &'a T,
    slot: &'a ReaderSlot<U>,
    /// Pins the guard to the acquiring thread.
    _not_send: PhantomData<*mut ()>,
}

impl<'a, T, U> ReadGuard<'a, T, U> {
    /// Caller has already performed `begin_read` on `slot`; the guard takes
    /// over the obligation to end it.
    pub(crate) fn new(data: &'a T, slot: &'a ReaderSlot<U>) -> Self {
        Self {
            data,
            slot,
            _not_send: PhantomData,
        }
    }

    /// The calling thread's user data.
    ///
    /// Lives with the thread's registration, not with the container's two
    /// slots, and is untouched by the publish protocol. Typical use is a
    /// per-thread tally or scratch that read-path code updates without any
    /// cross-thread synchronization.
    pub fn tls(&mut self) -> &mut U {
        // SAFETY: the slot is registered to this thread and the guard cannot
        // leave it. The reader lock is not recursive, so this is the only
        // live guard for this container on this thread, and `&mut self`
        // serializes access through it.
        unsafe { &mut *self.slot.user_data() }
    }
}

impl<T, U> Deref for ReadGuard<'_, T, U> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        self.data
    }
}

impl<T: fmt::Debug, U> fmt::Debug for ReadGuard<'_, T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadGuard").field(&self.data).finish()
    }
}

impl<T, U> Drop for ReadGuard<'_, T, U> {
    fn drop(&mut self) {
        // SAFETY: construction contract: exactly one begin_read is
        // outstanding and it belongs to this guard, on this thread.
        unsafe { self.slot.end_read() };
    }
}
