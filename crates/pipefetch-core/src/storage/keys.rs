//! Storage key generation.

use crate::model::StorageKey;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Produces storage keys that are unique for the lifetime of the generator.
pub trait KeyGenerator: Send + Sync {
    fn next_key(&self) -> StorageKey;
}

/// `download_<counter>_<16 hex>.<ext>`: a monotonic counter makes keys unique
/// within the process; the random suffix keeps separate runs into the same
/// directory from colliding.
#[derive(Debug)]
pub struct SequentialKeys {
    counter: AtomicU64,
    rng: Mutex<StdRng>,
    extension: String,
}

impl SequentialKeys {
    /// Keys with a random suffix seeded from the OS.
    pub fn new(extension: impl Into<String>) -> Self {
        Self::from_rng(StdRng::from_entropy(), extension)
    }

    /// Deterministic keys for tests: same seed, same sequence.
    pub fn with_seed(seed: u64, extension: impl Into<String>) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed), extension)
    }

    fn from_rng(rng: StdRng, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            counter: AtomicU64::new(0),
            rng: Mutex::new(rng),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Number of keys handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl KeyGenerator for SequentialKeys {
    fn next_key(&self) -> StorageKey {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut suffix = [0u8; 8];
        self.rng.lock().unwrap().fill_bytes(&mut suffix);
        let stem = format!("download_{:06}_{}", n, hex::encode(suffix));
        if self.extension.is_empty() {
            StorageKey::new(stem)
        } else {
            StorageKey::new(format!("{}.{}", stem, self.extension))
        }
    }
}
