use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

// Upper bound on redraws for one value. With a positive variance a draw is
// rejected about 4.6% of the time, so the bound is never reached in practice.
pub const MAX_DRAWS: usize = 1000;

/// Normal distribution restricted to `mean ± 2·stddev` by rejection.
///
/// A zero variance always yields the mean. If `MAX_DRAWS` candidates in a
/// row fall outside the band the mean is returned as well.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TruncatedNormal {
    mean: f64,
    std: f64,
}

impl TruncatedNormal {
    /// # Panics
    /// Panics on a non-finite mean or a negative/non-finite variance.
    pub fn new(mean: f64, variance: f64) -> Self {
        assert!(mean.is_finite(), "mean {mean} is not finite");
        assert!(variance.is_finite() && variance >= 0.0, "variance {variance} must be finite and non-negative");
        Self { mean: mean, std: variance.sqrt() }
    }

    pub fn accepts(&self, candidate: f64) -> bool {
        (candidate - self.mean).abs() <= 2.0 * self.std
    }
}

impl Distribution<f64> for TruncatedNormal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.std == 0.0 {
            return self.mean;
        }
        for _ in 0..MAX_DRAWS {
            let z: f64 = StandardNormal.sample(rng);
            let candidate = self.mean + self.std * z;
            if self.accepts(candidate) {
                return candidate;
            }
        }
        self.mean
    }
}
