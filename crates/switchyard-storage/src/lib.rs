//! Opaque key-value persistence for the Switchyard runtime.
//!
//! The runtime never assumes more of its host than a string key-value
//! facility. [`KvStore`] is that contract; [`MemoryKvStore`] serves tests
//! and hosts without durable state, [`RedbKvStore`] serves hosts that want
//! an embedded database file.

mod kv;
mod redb_store;

pub mod keys;

pub use kv::{KvStore, MemoryKvStore};
pub use redb_store::RedbKvStore;
