//! Key generation with configurable fault injection.
//!
//! [`SimulatedKeyGenerator`] stands in for a real key-derivation routine:
//! each key costs a fixed delay, and a [`FailurePolicy`] decides once per
//! batch whether the whole batch fails.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use provisioner_core::GeneratedKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Errors produced by a key generator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("simulated key generation error")]
    Injected,
}

/// Produces batches of distinct keys.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generate `count` distinct keys. Takes time proportional to `count`.
    async fn generate(&self, count: u32) -> Result<Vec<GeneratedKey>, GenerationError>;
}

// ---------------------------------------------------------------------------
// FailurePolicy
// ---------------------------------------------------------------------------

/// When a generated batch should fail.
#[derive(Debug, Clone, PartialEq)]
pub enum FailurePolicy {
    /// Every batch succeeds.
    Never,
    /// Every batch fails.
    Always,
    /// Each batch fails with probability `rate` (clamped to `[0, 1]`).
    /// A `seed` makes the sequence of decisions reproducible.
    Rate { rate: f64, seed: Option<u64> },
}

/// Runtime state for a [`FailurePolicy`].
enum FaultInjector {
    Never,
    Always,
    Rate { rate: f64, rng: Mutex<StdRng> },
}

impl FaultInjector {
    fn from_policy(policy: &FailurePolicy) -> Self {
        match policy {
            FailurePolicy::Never => Self::Never,
            FailurePolicy::Always => Self::Always,
            FailurePolicy::Rate { rate, seed } => {
                let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
                let rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(*seed),
                    None => StdRng::from_os_rng(),
                };
                Self::Rate {
                    rate,
                    rng: Mutex::new(rng),
                }
            }
        }
    }

    fn should_fail(&self) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Rate { rate, rng } => rng.lock().random_bool(*rate),
        }
    }
}

// ---------------------------------------------------------------------------
// SimulatedKeyGenerator
// ---------------------------------------------------------------------------

/// Upper bound on the up-front allocation for one batch. Larger batches grow
/// as keys are produced.
const PREALLOCATE_LIMIT: u32 = 1024;

/// Key generator that simulates derivation latency and injects faults.
///
/// Key ids are UUID v4 strings. Key material is the hex SHA-256 of the key
/// id and 32 random bytes; it has no cryptographic meaning.
pub struct SimulatedKeyGenerator {
    per_key_delay: Duration,
    faults: FaultInjector,
}

impl SimulatedKeyGenerator {
    #[must_use]
    pub fn new(per_key_delay: Duration, policy: &FailurePolicy) -> Self {
        Self {
            per_key_delay,
            faults: FaultInjector::from_policy(policy),
        }
    }

    fn derive_key() -> GeneratedKey {
        let key_id = Uuid::new_v4().to_string();
        let secret: [u8; 32] = rand::random();
        let mut hasher = Sha256::new();
        hasher.update(key_id.as_bytes());
        hasher.update(secret);
        GeneratedKey {
            key_id,
            material: hex::encode(hasher.finalize()),
        }
    }
}

#[async_trait]
impl KeyGenerator for SimulatedKeyGenerator {
    async fn generate(&self, count: u32) -> Result<Vec<GeneratedKey>, GenerationError> {
        let mut keys = Vec::with_capacity(count.min(PREALLOCATE_LIMIT) as usize);
        for _ in 0..count {
            tokio::time::sleep(self.per_key_delay).await;
            keys.push(Self::derive_key());
        }
        // One decision per batch, after the work is done.
        if self.faults.should_fail() {
            return Err(GenerationError::Injected);
        }
        Ok(keys)
    }
}
