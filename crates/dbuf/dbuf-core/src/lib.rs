//! `dbuf-core`: a doubly buffered container for read-mostly shared state.
//!
//! This crate provides a single primitive, [`DoublyBuffered`], that holds one
//! logical value and trades write cost for near-free reads. It is built for
//! configuration-like state in request-serving systems (routing tables,
//! backend lists, feature flags) where many threads read on every request and
//! a value changes rarely.
//!
//! # Core Components
//!
//! - [`DoublyBuffered`]: the container; owns two value slots and the reader
//!   registry
//! - [`ReadGuard`]: scoped read access to the current foreground slot plus
//!   the calling thread's user data
//! - [`ReadError`]: the (rare) ways [`DoublyBuffered::read`] can fail
//!
//! # Architecture
//!
//! ```text
//!                 fg_index (atomic)
//!                       │
//!            ┌──────────┴──────────┐
//!            ▼                     ▼
//!    ┌───────────────┐     ┌───────────────┐
//!    │   slots[0]    │     │   slots[1]    │
//!    │  (foreground) │     │  (background) │
//!    └───────┬───────┘     └───────┬───────┘
//!            │ &T                  │ &mut T
//!      readers, each           one writer at a time
//!      behind its own          (mutate, flip index,
//!      per-thread lock          drain reader locks,
//!                               mutate again)
//! ```
//!
//! Readers take a lock that is *theirs alone*: each reading thread registers
//! a record holding a private mutex, so reads never contend with other reads.
//! A writer mutates the background slot, publishes it by flipping the index,
//! then acquires and releases every registered reader lock once. That drain
//! waits out any read that started before the flip, after which the old
//! foreground is unreachable and the writer applies the same change to it so
//! both slots converge.
//!
//! # Example
//!
//! ```
//! use dbuf_core::DoublyBuffered;
//!
//! let table: DoublyBuffered<Vec<u32>> = DoublyBuffered::new();
//!
//! // Writers pass a closure that is applied to BOTH slots in turn and
//! // returns the number of changes (0 skips publication entirely).
//! table.modify(|v| {
//!     v.push(7);
//!     1
//! });
//!
//! let guard = table.read().unwrap();
//! assert_eq!(&*guard, &[7]);
//! ```
//!
//! # Internal Modules
//!
//! - `container`: the two-slot publish/drain protocol
//! - `reader`: per-thread registration records and the container registry
//! - `guard`: scoped read handle

mod container;
mod guard;
mod reader;

pub use container::DoublyBuffered;
pub use guard::ReadGuard;
pub use reader::ReadError;
