//! Affine-invariant ensemble sampler.
//!
//! Implements the Goodman & Weare (2010) stretch move. Walkers are split into
//! two halves; each half is updated in turn with proposals drawn relative to
//! the other half, and all proposals of a half are evaluated as one batch.
//!
//! A proposal whose evaluation fails, by error or by panic, is rejected and
//! counted against its walker. The other walkers of the batch are unaffected.

use itertools::Itertools;
use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::Rng;
use thiserror::Error;

use crate::config::ConfigError;
use crate::evaluator::{EvalFailure, LogpEvaluator};
use crate::model::{LogpError, Model};

#[derive(Error, Debug)]
pub enum SamplerError {
    /// The starting position of a walker could not be evaluated.
    #[error("Log density of walker {walker} failed with an unrecoverable error")]
    WalkerFailure {
        walker: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Log density of walker {walker} panicked: {message}")]
    WalkerPanic { walker: usize, message: String },
    #[error("Ensemble of {n_walkers} walkers with {found} parameters does not fit a model with {expected} parameters")]
    ShapeMismatch {
        n_walkers: usize,
        expected: usize,
        found: usize,
    },
}

/// Stretch move with scale `a`; the stretch factor `z` has density
/// `∝ 1/sqrt(z)` on `[1/a, a]`.
#[derive(Debug, Clone, Copy)]
pub struct StretchMove {
    a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2. }
    }
}

impl StretchMove {
    pub fn new(a: f64) -> Result<Self, ConfigError> {
        if !(a > 1.) || !a.is_finite() {
            return Err(ConfigError::InvalidStretchScale(a));
        }
        Ok(Self { a })
    }

    pub fn scale(&self) -> f64 {
        self.a
    }

    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.random();
        ((self.a - 1.) * u + 1.).powi(2) / self.a
    }

    /// `(d - 1) ln z + lp_new - lp_old`.
    ///
    /// Ties on a constant plateau keep a positive acceptance probability
    /// for stretches with `z > 1`, so walkers still move there.
    pub fn log_acceptance(&self, z: f64, dim: usize, lp_old: f64, lp_new: f64) -> f64 {
        if !lp_new.is_finite() {
            return f64::NEG_INFINITY;
        }
        (dim as f64 - 1.) * z.ln() + (lp_new - lp_old)
    }

    /// `y = c + z (x - c)`
    pub fn propose(&self, z: f64, current: &[f64], complement: &[f64]) -> Vec<f64> {
        current
            .iter()
            .zip(complement.iter())
            .map(|(&x, &c)| c + z * (x - c))
            .collect()
    }
}

/// Positions and log densities of all walkers at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    /// `[n_walkers][dim]`
    pub positions: Array2<f64>,
    /// `[n_walkers]`
    pub log_probs: Array1<f64>,
}

impl Ensemble {
    pub fn n_walkers(&self) -> usize {
        self.positions.nrows()
    }

    pub fn dim(&self) -> usize {
        self.positions.ncols()
    }

    /// Evaluates the log density at every position. Every walker needs a
    /// value to start from, so any failure is an error naming the walker.
    pub fn evaluate<M: Model, E: LogpEvaluator>(
        model: &M,
        evaluator: &E,
        positions: Array2<f64>,
    ) -> Result<Self, SamplerError> {
        let rows = positions.outer_iter().map(|row| row.to_vec()).collect_vec();
        let log_probs = evaluator
            .evaluate(model, &rows)
            .into_iter()
            .enumerate()
            .map(|(walker, result)| match result {
                Ok(logp) => Ok(logp),
                Err(failure) => Err(walker_error(walker, failure)),
            })
            .collect::<Result<Array1<f64>, _>>()?;
        Ok(Self {
            positions,
            log_probs,
        })
    }
}

fn walker_error<E: LogpError>(walker: usize, failure: EvalFailure<E>) -> SamplerError {
    match failure {
        EvalFailure::Logp(err) => SamplerError::WalkerFailure {
            walker,
            source: Box::new(err),
        },
        EvalFailure::Panic(message) => SamplerError::WalkerPanic { walker, message },
    }
}

/// Result of running the sampler for a fixed number of steps.
#[derive(Debug, Clone)]
pub struct EpochOutput {
    /// `[n_walkers][n_steps][dim]`
    pub samples: Array3<f64>,
    /// `[n_walkers][n_steps]`
    pub log_probs: Array2<f64>,
    /// Accepted proposals divided by proposals, per walker.
    pub acceptance_fraction: Array1<f64>,
    /// Number of proposals rejected because their evaluation failed, per walker.
    pub failed_evaluations: Array1<usize>,
}

impl EpochOutput {
    pub fn n_steps(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    /// The walker states after the final step.
    pub fn last_ensemble(&self) -> Option<Ensemble> {
        let last = self.n_steps().checked_sub(1)?;
        Some(Ensemble {
            positions: self.samples.index_axis(Axis(1), last).to_owned(),
            log_probs: self.log_probs.index_axis(Axis(1), last).to_owned(),
        })
    }

    pub fn mean_acceptance(&self) -> f64 {
        self.acceptance_fraction.mean().unwrap_or(0.)
    }
}

pub struct EnsembleSampler<'a, M, E> {
    model: &'a M,
    evaluator: &'a E,
    stretch: StretchMove,
}

impl<'a, M: Model, E: LogpEvaluator> EnsembleSampler<'a, M, E> {
    pub fn new(model: &'a M, evaluator: &'a E, stretch: StretchMove) -> Self {
        Self {
            model,
            evaluator,
            stretch,
        }
    }

    /// Advances every walker `n_steps` times starting from `start`.
    pub fn run<R: Rng + ?Sized>(
        &self,
        start: &Ensemble,
        n_steps: usize,
        rng: &mut R,
    ) -> Result<EpochOutput, SamplerError> {
        let n_walkers = start.n_walkers();
        let dim = start.dim();
        if dim != self.model.dim() || n_walkers < 2 || start.log_probs.len() != n_walkers {
            return Err(SamplerError::ShapeMismatch {
                n_walkers,
                expected: self.model.dim(),
                found: dim,
            });
        }

        let mut state = start.clone();
        let mut samples = Array3::zeros((n_walkers, n_steps, dim));
        let mut log_probs = Array2::zeros((n_walkers, n_steps));
        let mut accepted = Array1::<usize>::zeros(n_walkers);
        let mut failed = Array1::<usize>::zeros(n_walkers);

        let half = n_walkers / 2;
        for step in 0..n_steps {
            self.update_group(&mut state, 0..half, half..n_walkers, &mut accepted, &mut failed, rng);
            self.update_group(&mut state, half..n_walkers, 0..half, &mut accepted, &mut failed, rng);

            samples
                .slice_mut(s![.., step, ..])
                .assign(&state.positions);
            log_probs.column_mut(step).assign(&state.log_probs);
        }

        let acceptance_fraction = if n_steps == 0 {
            Array1::zeros(n_walkers)
        } else {
            accepted.mapv(|count| count as f64 / n_steps as f64)
        };

        Ok(EpochOutput {
            samples,
            log_probs,
            acceptance_fraction,
            failed_evaluations: failed,
        })
    }

    fn update_group<R: Rng + ?Sized>(
        &self,
        state: &mut Ensemble,
        active: std::ops::Range<usize>,
        complement: std::ops::Range<usize>,
        accepted: &mut Array1<usize>,
        failed: &mut Array1<usize>,
        rng: &mut R,
    ) {
        let dim = state.dim();
        let (proposals, stretches): (Vec<Vec<f64>>, Vec<f64>) = active
            .clone()
            .map(|walker| {
                let z = self.stretch.sample_z(rng);
                let partner = rng.random_range(complement.clone());
                let current = state.positions.row(walker).to_vec();
                let other = state.positions.row(partner).to_vec();
                (self.stretch.propose(z, &current, &other), z)
            })
            .unzip();

        let results = self.evaluator.evaluate(self.model, &proposals);

        for (walker, proposal, z, result) in
            itertools::izip!(active, proposals, stretches, results)
        {
            let lp_new = match result {
                Ok(logp) => logp,
                Err(failure) => {
                    failed[walker] += 1;
                    match failure {
                        EvalFailure::Logp(err) if err.is_recoverable() => {
                            tracing::debug!(walker, error = %err, "rejecting proposal after recoverable failure");
                        }
                        EvalFailure::Logp(err) => {
                            tracing::warn!(walker, error = %err, "rejecting proposal after log density failure");
                        }
                        EvalFailure::Panic(message) => {
                            tracing::warn!(walker, %message, "rejecting proposal after log density panic");
                        }
                    }
                    continue;
                }
            };

            let log_ratio = self
                .stretch
                .log_acceptance(z, dim, state.log_probs[walker], lp_new);
            let u: f64 = rng.random();
            if u.ln() < log_ratio {
                state
                    .positions
                    .row_mut(walker)
                    .assign(&Array1::from_vec(proposal));
                state.log_probs[walker] = lp_new;
                accepted[walker] += 1;
            }
        }
    }
}
