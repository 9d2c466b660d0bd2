//! `relay-core`: backend identities and the consistent-hash ring the relay
//! publishes to its request threads.

mod backend;
mod ring;

pub use backend::{Backend, BackendId};
pub use ring::HashRing;
