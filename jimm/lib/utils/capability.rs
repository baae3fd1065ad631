//! Injected clock and randomness capabilities.
//!
//! The engine never reads the wall clock or a global randomizer directly;
//! it holds these capabilities so tests can substitute deterministic
//! implementations.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Provides access to the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

/// A process-wide source of randomness used to permute placement
/// candidates. Two concurrent placements observe independent permutations.
#[derive(Debug)]
pub struct RandSource {
    rng: Mutex<StdRng>,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Default for RandSource {
    fn default() -> Self {
        RandSource {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RandSource {
    /// Creates a source with a fixed seed, yielding a reproducible sequence
    /// of permutations.
    pub fn seeded(seed: u64) -> Self {
        RandSource {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Shuffles the slice in place.
    pub fn shuffle<T>(&self, items: &mut [T]) {
        let mut rng = self.rng.lock().expect("rand source poisoned");
        items.shuffle(&mut *rng);
    }
}
