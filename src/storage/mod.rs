//! C1 — Storage Adapter: a typed wrapper over the Redis commands the
//! broker needs, with a fixed key layout preserved for wire compatibility.

pub mod adapter;
pub mod hash_codec;
pub mod keys;

pub use adapter::{connect, StorageAdapter};
