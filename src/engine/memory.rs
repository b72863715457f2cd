use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::TupleEngine;
use crate::command::Tuple;
use crate::{Result, TupleError};

/// An in-memory [`TupleEngine`] backed by a concurrent hash map.
///
/// Cloning a `MemStore` yields another handle onto the same map.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    tuples: Arc<DashMap<i32, Tuple>>,
}

impl MemStore {
    /// creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// number of tuples currently stored
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// true if no tuple is stored
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl TupleEngine for MemStore {
    fn init(&self) -> Result<()> {
        debug!(dropped = self.tuples.len(), "clearing in-memory store");
        self.tuples.clear();
        Ok(())
    }

    fn set(&self, key: i32, tuple: Tuple) -> Result<()> {
        tuple.validate()?;
        match self.tuples.entry(key) {
            Entry::Occupied(_) => Err(TupleError::KeyExists(key)),
            Entry::Vacant(slot) => {
                slot.insert(tuple);
                Ok(())
            }
        }
    }

    fn get(&self, key: i32) -> Result<Option<Tuple>> {
        Ok(self.tuples.get(&key).map(|entry| entry.value().clone()))
    }

    fn modify(&self, key: i32, tuple: Tuple) -> Result<()> {
        tuple.validate()?;
        match self.tuples.get_mut(&key) {
            Some(mut entry) => {
                *entry = tuple;
                Ok(())
            }
            None => Err(TupleError::KeyNotFound(key)),
        }
    }

    fn delete(&self, key: i32) -> Result<()> {
        self.tuples
            .remove(&key)
            .map(|_| ())
            .ok_or(TupleError::KeyNotFound(key))
    }

    fn exist(&self, key: i32) -> Result<bool> {
        Ok(self.tuples.contains_key(&key))
    }
}
