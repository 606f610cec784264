//! Random number sources.
//!
//! The engine consumes randomness only through [`RandomSource`], which is
//! implemented for every `rand::Rng`. Generators are created and seeded by
//! [`RngFactory`]; nothing in the engine seeds a generator itself.

use crate::error::EnvError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal};

/// Golden-ratio multiplier used to spread stream indices across the seed space.
const STREAM_MIX: u64 = 0x9e3779b97f4a7c15;

/// The draws every stochastic decision in the simulation is built from.
pub trait RandomSource {
    /// Uniform float in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Uniform integer in `[lo, hi]`. Returns `lo` when the range is empty.
    fn uniform_int(&mut self, lo: u64, hi: u64) -> u64;

    /// Uniform float in `[lo, hi)`. Returns `lo` when the range is empty.
    fn uniform_real(&mut self, lo: f64, hi: f64) -> f64;

    /// Log-normal sample with the given mean and standard deviation, never
    /// below `floor`.
    ///
    /// A non-negative `floor` shifts the distribution so that it starts
    /// there; a negative one shifts it by half the mean.
    fn lognormal(&mut self, mean: f64, sd: f64, floor: f64) -> f64;
}

impl<R: Rng> RandomSource for R {
    fn uniform(&mut self) -> f64 {
        self.gen::<f64>()
    }

    fn uniform_int(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            lo
        } else {
            self.gen_range(lo..=hi)
        }
    }

    fn uniform_real(&mut self, lo: f64, hi: f64) -> f64 {
        if hi > lo {
            self.gen_range(lo..hi)
        } else {
            lo
        }
    }

    fn lognormal(&mut self, mean: f64, sd: f64, floor: f64) -> f64 {
        match LogNormalShape::new(mean, sd, floor) {
            Ok(shape) => shape.sample(self),
            Err(_) => mean.max(floor),
        }
    }
}

/// Shifted log-normal distribution matching a requested mean and spread.
#[derive(Debug, Clone, Copy)]
pub struct LogNormalShape {
    /// Distribution of the part above `offset`
    dist: LogNormal<f64>,

    /// Shift applied to every sample
    offset: f64,

    /// Lower bound applied after shifting
    floor: f64,
}

impl LogNormalShape {
    /// Computes the underlying `mu` and `sigma` so that samples have the
    /// requested mean and standard deviation.
    pub fn new(mean: f64, sd: f64, floor: f64) -> Result<Self, EnvError> {
        let offset = if floor >= 0.0 { floor } else { mean / 2.0 };
        let m = mean - offset;
        if !(m > 0.0) || !(sd > 0.0) {
            return Err(EnvError::distribution(format!(
                "lognormal mean {mean} sd {sd} floor {floor}"
            )));
        }
        let mu = (m * m / (m * m + sd * sd).sqrt()).ln();
        let sigma = (1.0 + (sd / m).powi(2)).ln().sqrt();
        let dist = LogNormal::new(mu, sigma).map_err(|e| EnvError::distribution(e.to_string()))?;
        Ok(Self { dist, offset, floor })
    }

    /// Draws one sample.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        (self.dist.sample(rng) + self.offset).max(self.floor)
    }
}

/// Creates independent generator streams from a single master seed.
///
/// Each consumer (world build, each agent) takes its own stream so that
/// adding a consumer never perturbs the draws seen by the others.
#[derive(Debug, Clone, Copy)]
pub struct RngFactory {
    /// Master seed
    seed: u64,
}

impl RngFactory {
    /// Creates a factory. A seed of 0 is replaced by one drawn from OS entropy.
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 {
            rand::rngs::OsRng.gen::<u64>() | 1
        } else {
            seed
        };
        Self { seed }
    }

    /// Returns the effective master seed (for logging and reproduction).
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the generator for stream `index`.
    pub fn stream(&self, index: u64) -> ChaCha8Rng {
        let stream_seed = self.seed ^ index.wrapping_add(1).wrapping_mul(STREAM_MIX);
        ChaCha8Rng::seed_from_u64(stream_seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_streams_are_reproducible() {
        let a = RngFactory::new(42);
        let b = RngFactory::new(42);
        let mut ra = a.stream(3);
        let mut rb = b.stream(3);
        for _ in 0..10 {
            assert_eq!(ra.uniform(), rb.uniform());
        }
    }

    #[test]
    fn test_streams_differ() {
        let factory = RngFactory::new(42);
        let mut r0 = factory.stream(0);
        let mut r1 = factory.stream(1);
        let a: Vec<f64> = (0..4).map(|_| r0.uniform()).collect();
        let b: Vec<f64> = (0..4).map(|_| r1.uniform()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_seed_uses_entropy() {
        assert_ne!(RngFactory::new(0).seed(), 0);
    }

    #[test]
    fn test_lognormal_mean() {
        let mut rng = RngFactory::new(7).stream(0);
        let n = 20_000;
        let total: f64 = (0..n).map(|_| rng.lognormal(12.0, 5.0, 1.0)).sum();
        assert_relative_eq!(total / n as f64, 12.0, max_relative = 0.05);
    }

    #[test]
    fn test_lognormal_degenerate_falls_back() {
        let mut rng = RngFactory::new(7).stream(0);
        assert_eq!(rng.lognormal(5.0, 0.0, 1.0), 5.0);
        assert_eq!(rng.lognormal(1.0, 2.0, 3.0), 3.0);
        assert!(LogNormalShape::new(1.0, 2.0, 3.0).is_err());
    }

    #[test]
    fn test_empty_ranges() {
        let mut rng = RngFactory::new(1).stream(0);
        assert_eq!(rng.uniform_int(5, 5), 5);
        assert_eq!(rng.uniform_int(9, 2), 9);
        assert_eq!(rng.uniform_real(3.0, 3.0), 3.0);
    }

    proptest! {
        #[test]
        fn prop_lognormal_respects_floor(seed in 1u64..1000, mean in 2.0f64..30.0, sd in 0.1f64..10.0) {
            let mut rng = RngFactory::new(seed).stream(0);
            for _ in 0..20 {
                prop_assert!(rng.lognormal(mean, sd, 1.0) >= 1.0);
            }
        }

        #[test]
        fn prop_uniform_int_in_range(seed in 1u64..1000, lo in 0u64..100, span in 0u64..100) {
            let mut rng = RngFactory::new(seed).stream(0);
            let v = rng.uniform_int(lo, lo + span);
            prop_assert!(v >= lo && v <= lo + span);
        }
    }
}
