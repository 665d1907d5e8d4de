//! Triangular probability density dither

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// TPDF dither source
///
/// Each value is the difference between the current and the previous uniform
/// random number, both masked to the bits the output depth discards.
#[derive(Debug)]
pub struct Dither {
    rng: StdRng,
    previous: u64,
}

impl Dither {
    /// Dither seeded from the operating system
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic dither for tests and benchmarks
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let previous = rng.r#gen();
        Self { rng, previous }
    }

    /// Next dither value for an output depth of `bits`.
    #[allow(
        clippy::cast_possible_wrap,
        reason = "Masked to at most 56 bits, so the value fits in i64"
    )]
    pub fn next(&mut self, bits: u32) -> i64 {
        let mask = (1u64 << (64 - bits)) - 1;
        let r: u64 = self.rng.r#gen();
        let tpdf = (r & mask) as i64 - (self.previous & mask) as i64;
        self.previous = r;
        tpdf
    }
}

impl Default for Dither {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dither_bounds() {
        let mut dither = Dither::seeded(7);
        let limit = 1i64 << 48;
        for _ in 0..10_000 {
            let d = dither.next(16);
            assert!(d > -limit && d < limit);
        }
    }

    #[test]
    fn test_dither_is_zero_mean() {
        let mut dither = Dither::seeded(11);
        let n = 100_000;
        #[allow(clippy::cast_precision_loss)]
        let mean = (0..n).map(|_| dither.next(16) as f64).sum::<f64>() / f64::from(n);
        assert!(mean.abs() < (1u64 << 44) as f64);
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let mut a = Dither::seeded(3);
        let mut b = Dither::seeded(3);
        for _ in 0..100 {
            assert_eq!(a.next(24), b.next(24));
        }
    }
}
