use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::ConfigError;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Product of independent normal factors, one per hyperparameter.
#[derive(Debug, Clone)]
pub struct HyperPrior {
    factors: Vec<Normal<f64>>,
}

impl HyperPrior {
    pub fn new(means: &[f64], std_devs: &[f64]) -> Result<Self, ConfigError> {
        if means.len() != std_devs.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "prior standard deviations",
                expected: means.len(),
                found: std_devs.len(),
            });
        }
        let factors = means
            .iter()
            .zip(std_devs.iter())
            .enumerate()
            .map(|(index, (&mean, &std_dev))| {
                // `Normal::new` accepts a zero scale, which has no density.
                if !(std_dev > 0.) {
                    return Err(ConfigError::InvalidPriorFactor {
                        index,
                        mean,
                        std_dev,
                    });
                }
                Normal::new(mean, std_dev).map_err(|_| ConfigError::InvalidPriorFactor {
                    index,
                    mean,
                    std_dev,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { factors })
    }

    pub fn dim(&self) -> usize {
        self.factors.len()
    }

    /// Sum of the factor log densities.
    ///
    /// A vector of the wrong length has no density and yields `-inf`.
    pub fn log_prob(&self, params: &[f64]) -> f64 {
        if params.len() != self.dim() {
            return f64::NEG_INFINITY;
        }
        self.factors
            .iter()
            .zip(params.iter())
            .map(|(factor, &x)| {
                let z = (x - factor.mean()) / factor.std_dev();
                -0.5 * z * z - factor.std_dev().ln() - LN_SQRT_2PI
            })
            .sum()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let mut params = vec![0f64; self.dim()];
        self.sample_into(rng, &mut params);
        params
    }

    pub fn sample_into<R: Rng + ?Sized>(&self, rng: &mut R, params: &mut [f64]) {
        assert!(params.len() == self.dim());
        params
            .iter_mut()
            .zip(self.factors.iter())
            .for_each(|(x, factor)| *x = factor.sample(rng));
    }
}
