//! Durable key-value storage behind the cache.
//!
//! Every backend stores UTF-8 strings under string keys. Values written by
//! the cache are JSON documents wrapped in a versioned [`envelope`].

pub mod envelope;
pub mod file;
pub mod memory;

use std::fmt;

use crate::error::StorageError;

pub use file::FileStore;
pub use memory::{MemoryStore, UnavailableStore};

/// Minimal synchronous key-value store.
///
/// Callers must check [`is_available`](Self::is_available) before touching
/// the store; unavailable stores are an expected condition (no browser
/// storage during server-side rendering, read-only media, ...).
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn is_available(&self) -> bool {
        true
    }

    /// Returns the raw value stored under `key`, if any.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Deletes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Lists every key currently stored.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be enumerated.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}
