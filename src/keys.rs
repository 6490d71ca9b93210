//! LLM credential pool with round-robin rotation.
//!
//! The pool is read once from an environment variable holding a
//! comma-separated list of API keys. The starting index is random.

use parking_lot::Mutex;
use rand::Rng;

use crate::error::LlmError;

/// Pool of API keys plus the index of the key currently in use.
pub struct KeyRotator {
    keys: Vec<String>,
    index: Mutex<usize>,
    env_var: String,
}

impl KeyRotator {
    /// Build a rotator starting at a uniformly random index.
    pub fn new(keys: Vec<String>, env_var: impl Into<String>) -> Self {
        let start = if keys.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..keys.len())
        };
        Self::with_start(keys, env_var, start)
    }

    /// Build a rotator with an explicit starting index (wrapped into range).
    pub fn with_start(keys: Vec<String>, env_var: impl Into<String>, start: usize) -> Self {
        let start = if keys.is_empty() { 0 } else { start % keys.len() };
        Self {
            keys,
            index: Mutex::new(start),
            env_var: env_var.into(),
        }
    }

    /// Read the pool from `env_var`. A missing or empty variable yields an
    /// empty pool; the error only surfaces on the first LLM call.
    pub fn from_env(env_var: &str) -> Self {
        let raw = std::env::var(env_var).unwrap_or_default();
        let keys = parse_key_list(&raw);
        if keys.is_empty() {
            tracing::warn!(env_var, "no LLM API keys configured; analysis calls will fail");
        }
        let rotator = Self::new(keys, env_var);
        tracing::info!(
            index = rotator.index(),
            total = rotator.len(),
            "initialized API key pool"
        );
        rotator
    }

    /// The key at the current index.
    pub fn current(&self) -> Result<String, LlmError> {
        if self.keys.is_empty() {
            return Err(LlmError::Configuration {
                env_var: self.env_var.clone(),
            });
        }
        let index = *self.index.lock();
        Ok(self.keys[index].clone())
    }

    /// Advance to the next key, wrapping around. No-op on an empty pool.
    pub fn rotate(&self) {
        if self.keys.is_empty() {
            return;
        }
        let mut index = self.index.lock();
        *index = (*index + 1) % self.keys.len();
        tracing::info!(index = *index, "rotated API key");
    }

    pub fn index(&self) -> usize {
        *self.index.lock()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Split a comma-separated key list, trimming whitespace and dropping blanks.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
