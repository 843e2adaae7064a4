//! Bin registry: key → bin map
//!
//! The map guards only its own structure. Lookups clone the `Arc<Bin>` out
//! and release the shard before the caller touches the bin.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::bin::Bin;
use crate::key::{BinKey, KeyGenerator};
use crate::{ReqbinError, Result};

/// Default number of key draws before creation gives up
pub const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// Owns every bin for the life of the process
pub struct BinRegistry {
    bins: DashMap<BinKey, Arc<Bin>>,
    keys: KeyGenerator,
    max_attempts: usize,
}

impl BinRegistry {
    /// Create an empty registry
    ///
    /// # Panics
    ///
    /// Panics if `max_attempts` is 0
    #[must_use]
    pub fn new(keys: KeyGenerator, max_attempts: usize) -> Self {
        assert!(max_attempts > 0, "max_attempts must be > 0");

        Self {
            bins: DashMap::new(),
            keys,
            max_attempts,
        }
    }

    /// Create a bin under a fresh key
    ///
    /// # Errors
    ///
    /// Returns `KeyGeneration` if the random source fails or every attempt
    /// produced a key already in use
    pub fn create_bin(&self) -> Result<Arc<Bin>> {
        for attempt in 1..=self.max_attempts {
            let key = self.keys.generate()?;

            // The entry holds its shard locked; it must be gone before len()
            let created = match self.bins.entry(key) {
                Entry::Vacant(slot) => {
                    let bin = Arc::new(Bin::new(slot.key().clone()));
                    slot.insert(Arc::clone(&bin));
                    Some(bin)
                }
                Entry::Occupied(slot) => {
                    warn!(bin = %slot.key(), attempt, "Generated key already in use");
                    None
                }
            };

            if let Some(bin) = created {
                info!(bin = %bin.key(), bins = self.bins.len(), "Bin created");
                return Ok(bin);
            }
        }

        Err(ReqbinError::KeyGeneration(format!(
            "no unused key after {} attempts",
            self.max_attempts
        )))
    }

    /// Resolve a key
    ///
    /// # Errors
    ///
    /// Returns `BinNotFound` if no bin has this key
    pub fn lookup(&self, key: &BinKey) -> Result<Arc<Bin>> {
        self.bins
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ReqbinError::BinNotFound(key.clone()))
    }

    /// Whether a bin exists for `key`
    #[must_use]
    pub fn contains(&self, key: &BinKey) -> bool {
        self.bins.contains_key(key)
    }

    /// Number of bins
    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether no bin was created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

impl Default for BinRegistry {
    fn default() -> Self {
        Self::new(KeyGenerator::default(), DEFAULT_MAX_ATTEMPTS)
    }
}
