//! Seedable randomness for all sampling components
//!
//! Every component that draws randomness (pattern selection, parameter
//! shaping, session scheduling) takes a `Jitter` so behavior is
//! reproducible under a fixed seed and non-deterministic in production.

use rand::prelude::*;
use rand::rngs::StdRng;

/// Injected random source with jitter helpers
pub struct Jitter {
    rng: StdRng,
}

impl Jitter {
    /// Create a new jitter source with optional seed
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Create from entropy (random seed)
    pub fn from_entropy() -> Self {
        Self::new(None)
    }

    /// Reset the RNG with a new seed
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Multiplicative jitter factor in `[1 - bound, 1 + bound]`.
    ///
    /// `bound` is a fraction in (0, 1), e.g. 0.15 yields 0.85..=1.15.
    pub fn factor(&mut self, bound: f64) -> f64 {
        if bound <= 0.0 {
            return 1.0;
        }
        self.rng.gen_range((1.0 - bound)..=(1.0 + bound))
    }

    /// Uniform float in `[min, max]`
    pub fn range_f64(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// Uniform integer in `[min, max]`
    pub fn range_u64(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..=max)
    }

    /// Pick one element of a non-empty slice uniformly
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Pick an index by weight; weights need not be normalized.
    ///
    /// Returns 0 when all weights are zero or the slice has one element.
    pub fn choose_weighted_index(&mut self, weights: &[f64]) -> usize {
        if weights.len() <= 1 {
            return 0;
        }
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return 0;
        }
        let mut roll = self.rng.gen::<f64>() * total;
        for (i, w) in weights.iter().enumerate() {
            if *w <= 0.0 {
                continue;
            }
            if roll < *w {
                return i;
            }
            roll -= *w;
        }
        weights.len() - 1
    }

    /// Bernoulli draw with the given probability
    pub fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_with_seed() {
        let mut j1 = Jitter::new(Some(12345));
        let mut j2 = Jitter::new(Some(12345));

        for _ in 0..10 {
            assert_eq!(j1.range_u64(0, 1000), j2.range_u64(0, 1000));
            assert_eq!(j1.factor(0.2), j2.factor(0.2));
        }
    }

    #[test]
    fn test_factor_range() {
        let mut jitter = Jitter::new(Some(42));
        for _ in 0..100 {
            let f = jitter.factor(0.15);
            assert!(f >= 0.85);
            assert!(f <= 1.15);
        }
    }

    #[test]
    fn test_zero_bound_is_identity() {
        let mut jitter = Jitter::new(Some(42));
        assert_eq!(jitter.factor(0.0), 1.0);
    }

    #[test]
    fn test_weighted_index_respects_weights() {
        let mut jitter = Jitter::new(Some(42));
        let weights = [0.0, 1.0, 0.0];
        for _ in 0..100 {
            assert_eq!(jitter.choose_weighted_index(&weights), 1);
        }
    }

    #[test]
    fn test_weighted_index_distribution() {
        let mut jitter = Jitter::new(Some(7));
        let weights = [1.0, 3.0];
        let mut second = 0;
        let iterations = 2000;
        for _ in 0..iterations {
            if jitter.choose_weighted_index(&weights) == 1 {
                second += 1;
            }
        }
        // Expect roughly 75%, allow wide slack
        let rate = second as f64 / iterations as f64;
        assert!(rate > 0.65);
        assert!(rate < 0.85);
    }

    #[test]
    fn test_chance_probability() {
        let mut jitter = Jitter::new(Some(42));
        let mut hits = 0;
        let iterations = 1000;
        for _ in 0..iterations {
            if jitter.chance(0.5) {
                hits += 1;
            }
        }
        let rate = hits as f64 / iterations as f64;
        assert!(rate > 0.4);
        assert!(rate < 0.6);
    }

    #[test]
    fn test_reseed() {
        let mut jitter = Jitter::new(Some(42));
        let first = jitter.range_u64(0, 10_000);
        jitter.reseed(42);
        assert_eq!(jitter.range_u64(0, 10_000), first);
    }
}
