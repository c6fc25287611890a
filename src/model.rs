//! Core abstraction for densities sampled by the ensemble driver.

use anyhow::Result;
use rand::Rng;

/// Errors that happen when we evaluate the log density.
///
/// During sampling any failure only rejects the proposal of the affected
/// walker. Recoverable errors are logged at debug level, unrecoverable ones
/// and panics as warnings.
pub trait LogpError: std::error::Error + Send + Sync + 'static {
    fn is_recoverable(&self) -> bool;
}

/// A log density over a fixed-length real parameter vector.
///
/// Evaluation takes `&self` so that one model can be shared across the worker
/// threads evaluating an ensemble.
pub trait Model: Send + Sync {
    type LogpError: LogpError;

    /// The dimensionality of the parameter space.
    fn dim(&self) -> usize;

    /// Unnormalized log density at `position`.
    fn logp(&self, position: &[f64]) -> Result<f64, Self::LogpError>;

    /// Draws a starting position.
    fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) -> Result<()>;

    /// Whether `position` is an acceptable starting point.
    fn is_admissible(&self, _position: &[f64]) -> bool {
        true
    }

    fn param_names(&self) -> Vec<String> {
        (0..self.dim()).map(|i| format!("param_{}", i)).collect()
    }
}

#[cfg(test)]
pub mod test_logps {
    use anyhow::Result;
    use rand::Rng;
    use rand_distr::{Distribution, Normal};
    use thiserror::Error;

    use super::{LogpError, Model};

    /// Independent normal density with a shared location and scale.
    #[derive(Clone, Debug)]
    pub struct NormalLogp {
        pub dim: usize,
        pub mu: f64,
        pub sigma: f64,
    }

    #[derive(Error, Debug)]
    pub enum NormalLogpError {}

    impl LogpError for NormalLogpError {
        fn is_recoverable(&self) -> bool {
            false
        }
    }

    impl Model for NormalLogp {
        type LogpError = NormalLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn logp(&self, position: &[f64]) -> Result<f64, NormalLogpError> {
            Ok(position
                .iter()
                .map(|&x| {
                    let z = (x - self.mu) / self.sigma;
                    -0.5 * z * z
                })
                .sum())
        }

        fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) -> Result<()> {
            let spread = Normal::new(self.mu, 5. * self.sigma)?;
            position.iter_mut().for_each(|x| *x = spread.sample(rng));
            Ok(())
        }
    }

    /// Fails for every position with a negative first coordinate.
    pub struct HalfPlaneLogp {
        pub recoverable: bool,
    }

    #[derive(Error, Debug)]
    #[error("position {0} is outside the half plane")]
    pub struct HalfPlaneError(pub f64, pub bool);

    impl LogpError for HalfPlaneError {
        fn is_recoverable(&self) -> bool {
            self.1
        }
    }

    impl Model for HalfPlaneLogp {
        type LogpError = HalfPlaneError;

        fn dim(&self) -> usize {
            2
        }

        fn logp(&self, position: &[f64]) -> Result<f64, HalfPlaneError> {
            if position[0] < 0. {
                return Err(HalfPlaneError(position[0], self.recoverable));
            }
            Ok(-0.5 * position.iter().map(|x| (x - 1.) * (x - 1.)).sum::<f64>())
        }

        fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) -> Result<()> {
            position
                .iter_mut()
                .for_each(|x| *x = rng.random_range(0.5..1.5));
            Ok(())
        }
    }

    /// Standard normal density that panics above `limit`.
    pub struct PanickingLogp {
        pub limit: f64,
    }

    impl Model for PanickingLogp {
        type LogpError = NormalLogpError;

        fn dim(&self) -> usize {
            1
        }

        fn logp(&self, position: &[f64]) -> Result<f64, NormalLogpError> {
            if position[0] > self.limit {
                panic!("bad cosmology evaluation at {}", position[0]);
            }
            Ok(-0.5 * position[0] * position[0])
        }

        fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) -> Result<()> {
            position[0] = rng.random_range(-1.0..1.0);
            Ok(())
        }

        fn is_admissible(&self, position: &[f64]) -> bool {
            position[0] < self.limit
        }
    }
}
