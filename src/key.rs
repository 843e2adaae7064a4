//! Bin key generation
//!
//! Keys are drawn from `[a-z0-9]` using the operating system random source.
//! Bytes are rejection-sampled so every symbol is equally likely.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{ReqbinError, Result};

/// Symbols a key is built from
pub const KEY_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Default key length
pub const DEFAULT_KEY_LENGTH: usize = 10;

/// Largest multiple of the alphabet size that fits in a byte
const REJECTION_LIMIT: u8 = (256 / KEY_ALPHABET.len() * KEY_ALPHABET.len()) as u8;

/// Opaque bin identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinKey(String);

impl BinKey {
    /// Wrap an externally supplied key (e.g. a URL path segment)
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BinKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Random key generator
#[derive(Debug, Clone, Copy)]
pub struct KeyGenerator {
    length: usize,
}

impl KeyGenerator {
    /// Create a generator producing keys of `length` symbols
    ///
    /// # Panics
    ///
    /// Panics if `length` is 0
    #[must_use]
    pub fn new(length: usize) -> Self {
        assert!(length > 0, "key length must be > 0");
        Self { length }
    }

    /// Key length in symbols
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Generate a fresh key
    ///
    /// # Errors
    ///
    /// Returns `KeyGeneration` if the random source fails
    pub fn generate(&self) -> Result<BinKey> {
        self.generate_with(&mut OsRng)
    }

    /// Generate a key from the given random source
    ///
    /// # Errors
    ///
    /// Returns `KeyGeneration` if the random source fails
    pub fn generate_with<R: RngCore + ?Sized>(&self, rng: &mut R) -> Result<BinKey> {
        let mut key = String::with_capacity(self.length);
        let mut buf = [0u8; 32];

        while key.len() < self.length {
            rng.try_fill_bytes(&mut buf)
                .map_err(|e| ReqbinError::KeyGeneration(e.to_string()))?;

            for &byte in &buf {
                if byte >= REJECTION_LIMIT {
                    continue;
                }
                key.push(char::from(KEY_ALPHABET[usize::from(byte) % KEY_ALPHABET.len()]));
                if key.len() == self.length {
                    break;
                }
            }
        }

        Ok(BinKey(key))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_LENGTH)
    }
}
