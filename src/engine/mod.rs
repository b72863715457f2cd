//! This module provides the tuple storage engines the server dispatches requests to.
//! Two engines are implemented: [`MemStore`], a concurrent in-memory map, and [`LogStore`],
//! which persists tuples into log files on the local file system.
use crate::command::Tuple;
use crate::Result;

/// A trait for the six operations of a tuple storage engine.
///
/// Engines are cloned into every worker thread, so a clone must be a cheap handle onto the
/// same underlying store.
pub trait TupleEngine: Clone + Send + 'static {
    /// destroys every tuple in the store
    fn init(&self) -> Result<()>;

    /// stores `tuple` under `key`
    ///
    /// # Errors
    ///
    /// Returns `TupleError::KeyExists` if `key` is already present, and
    /// `TupleError::InvalidArgument` if the tuple has an invalid shape.
    fn set(&self, key: i32, tuple: Tuple) -> Result<()>;

    /// Gets the tuple associated with the given `key`
    ///
    /// Returns `None` if the given `key` does not exist.
    fn get(&self, key: i32) -> Result<Option<Tuple>>;

    /// replaces the tuple stored under `key`
    ///
    /// # Errors
    ///
    /// Returns `TupleError::KeyNotFound` if the given `key` is not found.
    fn modify(&self, key: i32, tuple: Tuple) -> Result<()>;

    /// Removes the given `key` (and associated tuple) from the store
    ///
    /// # Errors
    ///
    /// Returns `TupleError::KeyNotFound` if the given `key` is not found.
    fn delete(&self, key: i32) -> Result<()>;

    /// returns true if a tuple is stored under `key`
    fn exist(&self, key: i32) -> Result<bool>;
}

mod log;
mod memory;

pub use self::log::LogStore;
pub use self::memory::MemStore;
