//! Normally distributed service-time samples.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::time::Duration;

/// Draws a delay from N(mean, stddev) in milliseconds.
///
/// Negative draws are clamped to zero.
pub fn sample_delay(mean_ms: u64, stddev_ms: u64) -> Duration {
    delay_from(mean_ms, stddev_ms, &mut rand::rng())
}

fn delay_from<R: Rng + ?Sized>(mean_ms: u64, stddev_ms: u64, rng: &mut R) -> Duration {
    let z: f64 = StandardNormal.sample(rng);
    let millis = mean_ms as f64 + stddev_ms as f64 * z;
    if millis.is_nan() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(millis / 1000.0)
}

/// Latency profile shared by request handlers.
#[derive(Debug)]
pub struct LatencySimulator {
    mean_ms: u64,
    stddev_ms: u64,
    /// Seeded source for reproducible sequences; thread RNG otherwise
    rng: Option<Mutex<StdRng>>,
}

impl LatencySimulator {
    pub fn new(mean_ms: u64, stddev_ms: u64) -> Self {
        Self {
            mean_ms,
            stddev_ms,
            rng: None,
        }
    }

    pub fn with_seed(mean_ms: u64, stddev_ms: u64, seed: u64) -> Self {
        Self {
            mean_ms,
            stddev_ms,
            rng: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn sample(&self) -> Duration {
        match &self.rng {
            Some(rng) => delay_from(self.mean_ms, self.stddev_ms, &mut *rng.lock()),
            None => sample_delay(self.mean_ms, self.stddev_ms),
        }
    }

    pub fn mean(&self) -> Duration {
        Duration::from_millis(self.mean_ms)
    }

    pub fn stddev(&self) -> Duration {
        Duration::from_millis(self.stddev_ms)
    }
}
