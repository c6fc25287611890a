use thiserror::Error;

use crate::bounds::ParamBounds;
use crate::prior::HyperPrior;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Expected {expected} values for {what}, got {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Prior factor {index} has invalid location {mean} or scale {std_dev}")]
    InvalidPriorFactor { index: usize, mean: f64, std_dev: f64 },
    #[error("Bounds for parameter {index} are empty: ({lower}, {upper})")]
    EmptyBounds { index: usize, lower: f64, upper: f64 },
    #[error("Need at least {required} walkers for {dim} parameters, got {found}")]
    TooFewWalkers {
        required: usize,
        dim: usize,
        found: usize,
    },
    #[error("Convergence threshold must be a finite value >= 1, got {0}")]
    InvalidThreshold(f64),
    #[error("Stretch move scale must be > 1, got {0}")]
    InvalidStretchScale(f64),
    #[error("{0} must be positive")]
    ZeroSteps(&'static str),
}

/// Prior and admissible box for the two cosmological hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CosmologyConfig {
    /// Prior means for `[H0, Ωm]`.
    pub prior_means: [f64; 2],
    /// Prior standard deviations for `[H0, Ωm]`.
    pub prior_std_devs: [f64; 2],
    /// Lower bounds of the admissible box.
    pub lower_bounds: [f64; 2],
    /// Upper bounds of the admissible box.
    pub upper_bounds: [f64; 2],
}

impl Default for CosmologyConfig {
    fn default() -> Self {
        Self {
            prior_means: [70., 0.3],
            prior_std_devs: [10., 0.1],
            lower_bounds: [50., 0.],
            upper_bounds: [90., 1.],
        }
    }
}

impl CosmologyConfig {
    pub fn with_prior(mut self, means: [f64; 2], std_devs: [f64; 2]) -> Self {
        self.prior_means = means;
        self.prior_std_devs = std_devs;
        self
    }

    pub fn with_bounds(mut self, lower: [f64; 2], upper: [f64; 2]) -> Self {
        self.lower_bounds = lower;
        self.upper_bounds = upper;
        self
    }

    pub fn param_names(&self) -> Vec<String> {
        vec!["H0".to_string(), "Om0".to_string()]
    }

    pub fn hyperprior(&self) -> Result<HyperPrior, ConfigError> {
        HyperPrior::new(&self.prior_means, &self.prior_std_devs)
    }

    pub fn bounds(&self) -> Result<ParamBounds, ConfigError> {
        ParamBounds::new(self.lower_bounds.to_vec(), self.upper_bounds.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prior_mean_is_admissible() {
        let config = CosmologyConfig::default();
        let bounds = config.bounds().unwrap();
        assert!(bounds.param_check(&config.prior_means));
        assert_eq!(config.hyperprior().unwrap().dim(), 2);
        assert_eq!(config.param_names().len(), 2);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let config = CosmologyConfig::default().with_bounds([50., 0.], [40., 1.]);
        assert!(matches!(
            config.bounds(),
            Err(ConfigError::EmptyBounds { index: 0, .. })
        ));
    }
}
