//! Burn-in and production sampling of a [`Model`] with an ensemble sampler.
//!
//! The driver moves through `Init → BurningIn → Converged → Production →
//! Done`. During burn-in it runs fixed-length epochs and checks the
//! Gelman-Rubin statistic of the cumulative chain after each of them. Once
//! every R̂ is below the threshold, or the epoch limit is reached, it runs the
//! production steps and records the full chain.

use anyhow::{Context, Result};
use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView3, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::ConfigError;
use crate::diagnostics::GelmanRubin;
use crate::ensemble::{Ensemble, EnsembleSampler, EpochOutput, StretchMove};
use crate::evaluator::LogpEvaluator;
use crate::model::Model;
use crate::storage::{Checkpoint, CheckpointKey, CheckpointSink};

/// Settings of a sampling run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverSettings {
    /// Number of walkers in the ensemble.
    pub n_walkers: usize,
    /// Steps per burn-in epoch.
    pub n_init_steps: usize,
    /// Steps of the production run after burn-in.
    pub n_production_steps: usize,
    /// Burn-in ends once the largest R̂ is at most this value.
    pub gr_threshold: f64,
    /// Burn-in ends after this many epochs even without convergence.
    pub max_epochs: usize,
    pub seed: u64,
    /// Prior draws per walker before initialization gives up.
    pub max_init_tries: usize,
    /// Scale `a` of the stretch move.
    pub stretch_scale: f64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            n_walkers: 32,
            n_init_steps: 100,
            n_production_steps: 1000,
            gr_threshold: 1.2,
            max_epochs: 50,
            seed: 0,
            max_init_tries: 500,
            stretch_scale: 2.,
        }
    }
}

impl DriverSettings {
    pub fn with_walkers(mut self, n_walkers: usize) -> Self {
        self.n_walkers = n_walkers;
        self
    }

    pub fn with_steps(mut self, n_init_steps: usize, n_production_steps: usize) -> Self {
        self.n_init_steps = n_init_steps;
        self.n_production_steps = n_production_steps;
        self
    }

    pub fn with_threshold(mut self, gr_threshold: f64) -> Self {
        self.gr_threshold = gr_threshold;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The smallest ensemble that can sample `dim` parameters.
    pub fn min_walkers(dim: usize) -> usize {
        (2 * dim).max(4)
    }

    pub fn validate(&self, dim: usize) -> Result<(), ConfigError> {
        let required = Self::min_walkers(dim);
        if self.n_walkers < required {
            return Err(ConfigError::TooFewWalkers {
                required,
                dim,
                found: self.n_walkers,
            });
        }
        if !self.gr_threshold.is_finite() || self.gr_threshold < 1. {
            return Err(ConfigError::InvalidThreshold(self.gr_threshold));
        }
        for (value, name) in [
            (self.n_init_steps, "n_init_steps"),
            (self.n_production_steps, "n_production_steps"),
            (self.max_epochs, "max_epochs"),
            (self.max_init_tries, "max_init_tries"),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroSteps(name));
            }
        }
        StretchMove::new(self.stretch_scale)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    BurningIn { epoch: usize },
    Converged,
    Production,
    Done,
}

/// The chain of all walkers, growing along the step axis.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTrace {
    /// `[walker][step][param]`
    pub samples: Array3<f64>,
    /// `[walker][step]`
    pub log_probs: Array2<f64>,
}

impl ChainTrace {
    pub fn empty(n_walkers: usize, dim: usize) -> Self {
        Self {
            samples: Array3::zeros((n_walkers, 0, dim)),
            log_probs: Array2::zeros((n_walkers, 0)),
        }
    }

    pub fn n_walkers(&self) -> usize {
        self.samples.len_of(Axis(0))
    }

    pub fn n_steps(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    pub fn dim(&self) -> usize {
        self.samples.len_of(Axis(2))
    }

    /// Appends the steps of `segment` after the current last step.
    pub fn append(&mut self, segment: &EpochOutput) -> Result<()> {
        self.samples = concatenate(Axis(1), &[self.samples.view(), segment.samples.view()])
            .context("Segment does not match the chain shape")?;
        self.log_probs = concatenate(Axis(1), &[self.log_probs.view(), segment.log_probs.view()])
            .context("Segment does not match the chain shape")?;
        Ok(())
    }

    /// Position of every walker after the last step.
    pub fn last_positions(&self) -> Option<Array2<f64>> {
        let last = self.n_steps().checked_sub(1)?;
        Some(self.samples.index_axis(Axis(1), last).to_owned())
    }

    /// All positions after the first `discard` steps, one row per walker and
    /// step, ordered by step first.
    pub fn flat_samples(&self, discard: usize) -> Array2<f64> {
        let kept = self.samples.slice(s![.., discard.min(self.n_steps()).., ..]);
        let (n_walkers, n_steps, dim) = kept.dim();
        Array2::from_shape_fn((n_walkers * n_steps, dim), |(row, param)| {
            kept[[row % n_walkers, row / n_walkers, param]]
        })
    }

    pub fn mean(&self, discard: usize) -> Array1<f64> {
        let flat = self.flat_samples(discard);
        flat.mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(self.dim(), f64::NAN))
    }

    /// Sample standard deviation per parameter.
    pub fn std(&self, discard: usize) -> Array1<f64> {
        let flat = self.flat_samples(discard);
        if flat.nrows() < 2 {
            return Array1::from_elem(self.dim(), f64::NAN);
        }
        flat.std_axis(Axis(0), 1.)
    }
}

/// Summary of one burn-in epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    /// R̂ of the cumulative chain after this epoch.
    pub r_hat: Array1<f64>,
    pub mean_acceptance: f64,
    /// Proposals rejected because their evaluation failed, per walker.
    pub failed_evaluations: Array1<usize>,
}

#[derive(Debug, Clone)]
pub struct DriverOutput {
    /// Burn-in followed by the production steps.
    pub chain: ChainTrace,
    pub param_names: Vec<String>,
    /// Number of leading burn-in steps in `chain`.
    pub burn_in_steps: usize,
    /// False if burn-in stopped at the epoch limit.
    pub converged: bool,
    pub epochs: Vec<EpochSummary>,
    /// Per-walker acceptance fraction of the production run.
    pub acceptance_fraction: Array1<f64>,
    /// Per-walker failed evaluations of the production run.
    pub production_failures: Array1<usize>,
}

impl DriverOutput {
    pub fn burn_in_epochs(&self) -> usize {
        self.epochs.len()
    }

    pub fn r_hat_history(&self) -> Vec<Array1<f64>> {
        self.epochs.iter().map(|epoch| epoch.r_hat.clone()).collect()
    }

    /// The production part of the chain.
    pub fn production(&self) -> ArrayView3<'_, f64> {
        self.chain.samples.slice(s![.., self.burn_in_steps.., ..])
    }

    pub fn posterior_mean(&self) -> Array1<f64> {
        self.chain.mean(self.burn_in_steps)
    }

    pub fn posterior_std(&self) -> Array1<f64> {
        self.chain.std(self.burn_in_steps)
    }

    pub fn mean_acceptance(&self) -> f64 {
        self.acceptance_fraction.mean().unwrap_or(0.)
    }

    /// Failed evaluations of every walker over burn-in and production.
    pub fn failed_evaluations(&self) -> Array1<usize> {
        self.epochs
            .iter()
            .fold(self.production_failures.clone(), |total, epoch| {
                total + &epoch.failed_evaluations
            })
    }
}

const INIT_STREAM: u64 = 0;
const PRODUCTION_STREAM: u64 = u64::MAX;

/// Runs the burn-in and production phases of one inference run.
pub struct Driver<'a, M, E, S> {
    model: &'a M,
    evaluator: &'a E,
    sink: S,
    settings: DriverSettings,
    state: DriverState,
}

impl<'a, M: Model, E: LogpEvaluator, S: CheckpointSink> Driver<'a, M, E, S> {
    pub fn new(
        model: &'a M,
        evaluator: &'a E,
        sink: S,
        settings: DriverSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate(model.dim())?;
        Ok(Self {
            model,
            evaluator,
            sink,
            settings,
            state: DriverState::Init,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// The random stream of one phase. Streams of a seed are independent, so
    /// every phase is reproducible on its own.
    fn rng(&self, stream: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        rng.set_stream(stream);
        rng
    }

    /// Draws starting positions from the model until every walker has an
    /// admissible one.
    pub fn initial_ensemble(&self) -> Result<Ensemble> {
        let dim = self.model.dim();
        let mut rng = self.rng(INIT_STREAM);
        let mut positions = Array2::zeros((self.settings.n_walkers, dim));
        let mut point = vec![0f64; dim];

        for (walker, mut row) in positions.outer_iter_mut().enumerate() {
            let mut found = false;
            for _ in 0..self.settings.max_init_tries {
                self.model
                    .init_position(&mut rng, &mut point)
                    .context("Could not draw a starting position")?;
                if self.model.is_admissible(&point) {
                    found = true;
                    break;
                }
            }
            anyhow::ensure!(
                found,
                "No admissible starting position for walker {} after {} draws",
                walker,
                self.settings.max_init_tries
            );
            row.assign(&ndarray::aview1(&point));
        }

        Ensemble::evaluate(self.model, self.evaluator, positions)
            .context("Could not evaluate the starting positions")
    }

    pub fn run(&mut self) -> Result<DriverOutput> {
        self.state = DriverState::Init;
        let param_names = self.model.param_names();
        let stretch = StretchMove::new(self.settings.stretch_scale)?;
        let sampler = EnsembleSampler::new(self.model, self.evaluator, stretch);

        let mut current = self.initial_ensemble()?;
        let mut chain = ChainTrace::empty(self.settings.n_walkers, self.model.dim());
        let mut epochs = Vec::new();
        let mut converged = false;

        for epoch in 0..self.settings.max_epochs {
            self.state = DriverState::BurningIn { epoch };
            let mut rng = self.rng(epoch as u64 + 1);
            let segment = sampler
                .run(&current, self.settings.n_init_steps, &mut rng)
                .with_context(|| format!("Sampling failed in burn-in epoch {}", epoch))?;

            self.sink
                .record(
                    CheckpointKey::Epoch(epoch),
                    Checkpoint {
                        samples: segment.samples.view(),
                        log_probs: segment.log_probs.view(),
                        acceptance: Some(segment.acceptance_fraction.view()),
                        param_names: &param_names,
                    },
                )
                .with_context(|| format!("Could not store checkpoint of epoch {}", epoch))?;

            chain.append(&segment)?;
            current = segment
                .last_ensemble()
                .context("Burn-in epoch produced no steps")?;

            let diagnostic = GelmanRubin::compute(chain.samples.view());
            let summary = EpochSummary {
                epoch,
                r_hat: diagnostic.r_hat.clone(),
                mean_acceptance: segment.mean_acceptance(),
                failed_evaluations: segment.failed_evaluations.clone(),
            };
            tracing::info!(
                epoch,
                max_r_hat = diagnostic.max_r_hat(),
                mean_acceptance = summary.mean_acceptance,
                failed_evaluations = summary.failed_evaluations.sum(),
                "finished burn-in epoch"
            );
            epochs.push(summary);

            if diagnostic.is_converged(self.settings.gr_threshold) {
                converged = true;
                break;
            }
        }

        if converged {
            self.state = DriverState::Converged;
            tracing::info!(epochs = epochs.len(), "burn-in converged");
        } else {
            tracing::warn!(
                max_epochs = self.settings.max_epochs,
                threshold = self.settings.gr_threshold,
                "burn-in did not converge, continuing with production"
            );
        }
        let burn_in_steps = chain.n_steps();

        self.state = DriverState::Production;
        tracing::info!(steps = self.settings.n_production_steps, "starting production run");
        let mut rng = self.rng(PRODUCTION_STREAM);
        let production = sampler
            .run(&current, self.settings.n_production_steps, &mut rng)
            .context("Sampling failed in the production run")?;
        chain.append(&production)?;

        self.sink
            .record(
                CheckpointKey::Final,
                Checkpoint {
                    samples: chain.samples.view(),
                    log_probs: chain.log_probs.view(),
                    acceptance: Some(production.acceptance_fraction.view()),
                    param_names: &param_names,
                },
            )
            .context("Could not store the final chain")?;
        self.sink.flush().context("Could not flush checkpoints")?;

        self.state = DriverState::Done;
        tracing::info!(
            mean_acceptance = production.mean_acceptance(),
            failed_evaluations = production.failed_evaluations.sum(),
            "sampling done"
        );

        Ok(DriverOutput {
            chain,
            param_names,
            burn_in_steps,
            converged,
            epochs,
            acceptance_fraction: production.acceptance_fraction,
            production_failures: production.failed_evaluations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{RayonEvaluator, SequentialEvaluator};
    use crate::model::test_logps::{NormalLogp, PanickingLogp};
    use crate::storage::MemoryCheckpoint;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    fn normal() -> NormalLogp {
        NormalLogp {
            dim: 1,
            mu: 3.,
            sigma: 1.,
        }
    }

    #[test]
    fn settings_validation() {
        assert!(DriverSettings::default().validate(2).is_ok());
        assert!(matches!(
            DriverSettings::default().with_walkers(5).validate(3),
            Err(ConfigError::TooFewWalkers { required: 6, .. })
        ));
        assert!(matches!(
            DriverSettings::default().with_threshold(0.9).validate(1),
            Err(ConfigError::InvalidThreshold(_))
        ));
        assert!(matches!(
            DriverSettings::default().with_steps(0, 10).validate(1),
            Err(ConfigError::ZeroSteps("n_init_steps"))
        ));
        let settings = DriverSettings {
            stretch_scale: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(1),
            Err(ConfigError::InvalidStretchScale(_))
        ));
    }

    #[test]
    fn converges_and_records_checkpoints() {
        let model = normal();
        let evaluator = SequentialEvaluator;
        let settings = DriverSettings::default()
            .with_walkers(10)
            .with_steps(20, 200)
            .with_max_epochs(20)
            .with_seed(42);
        let mut driver =
            Driver::new(&model, &evaluator, MemoryCheckpoint::new(), settings).unwrap();
        assert_eq!(driver.state(), DriverState::Init);
        let output = driver.run().unwrap();
        assert_eq!(driver.state(), DriverState::Done);

        assert!(output.converged);
        let epochs = output.burn_in_epochs();
        assert!((1..=20).contains(&epochs));
        assert_eq!(output.burn_in_steps, 20 * epochs);
        assert_eq!(output.chain.samples.dim(), (10, 20 * epochs + 200, 1));
        assert!(output.epochs.last().unwrap().r_hat[0] <= 1.2);
        assert_eq!(output.production().dim(), (10, 200, 1));
        assert!(output.mean_acceptance() > 0.);

        let sink = driver.into_sink();
        assert_eq!(sink.len(), epochs + 1);
        let first = sink.get(CheckpointKey::Epoch(0)).unwrap();
        assert_eq!(first.samples.dim(), (10, 20, 1));
        assert!(first.acceptance.is_some());
        let last = sink.get(CheckpointKey::Final).unwrap();
        assert_eq!(last.samples, output.chain.samples);
        assert_eq!(last.param_names, vec!["param_0".to_string()]);
    }

    #[test]
    fn same_seed_same_run() {
        let model = NormalLogp {
            dim: 2,
            mu: 0.,
            sigma: 2.,
        };
        let settings = DriverSettings::default()
            .with_walkers(8)
            .with_steps(10, 30)
            .with_seed(7);
        let sequential = SequentialEvaluator;
        let parallel = RayonEvaluator::new(4).unwrap();
        let a = Driver::new(&model, &sequential, (), settings)
            .unwrap()
            .run()
            .unwrap();
        let b = Driver::new(&model, &parallel, (), settings)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(a.chain, b.chain);
        assert_eq!(a.burn_in_steps, b.burn_in_steps);
    }

    #[test]
    fn safety_valve_stops_burn_in() {
        let model = normal();
        let evaluator = SequentialEvaluator;
        // Two steps per epoch keep a single iteration per walker, for which
        // R̂ is infinite.
        let settings = DriverSettings::default()
            .with_walkers(10)
            .with_steps(2, 5)
            .with_max_epochs(1);
        let output = Driver::new(&model, &evaluator, (), settings)
            .unwrap()
            .run()
            .unwrap();
        assert!(!output.converged);
        assert_eq!(output.burn_in_epochs(), 1);
        assert_eq!(output.r_hat_history()[0][0], f64::INFINITY);
        assert_eq!(output.chain.n_steps(), 7);
    }

    #[test]
    fn panicking_walkers_do_not_abort_the_run() {
        let model = PanickingLogp { limit: 1.5 };
        let evaluator = RayonEvaluator::new(2).unwrap();
        let settings = DriverSettings::default()
            .with_walkers(10)
            .with_steps(20, 100)
            .with_max_epochs(5)
            .with_seed(3);
        let mut driver =
            Driver::new(&model, &evaluator, MemoryCheckpoint::new(), settings).unwrap();
        let output = driver.run().unwrap();
        assert_eq!(driver.state(), DriverState::Done);

        assert!(output.chain.samples.iter().all(|&x| x <= 1.5));
        let failures = output.failed_evaluations();
        assert_eq!(failures.len(), 10);
        assert!(failures.sum() > 0);
        let burn_in: usize = output
            .epochs
            .iter()
            .map(|epoch| epoch.failed_evaluations.sum())
            .sum();
        assert_eq!(burn_in + output.production_failures.sum(), failures.sum());
        assert!(driver.into_sink().get(CheckpointKey::Final).is_some());
    }

    struct NowhereAdmissible;

    impl Model for NowhereAdmissible {
        type LogpError = <NormalLogp as Model>::LogpError;

        fn dim(&self) -> usize {
            1
        }

        fn logp(&self, _position: &[f64]) -> std::result::Result<f64, Self::LogpError> {
            Ok(0.)
        }

        fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) -> Result<()> {
            position[0] = rng.random();
            Ok(())
        }

        fn is_admissible(&self, _position: &[f64]) -> bool {
            false
        }
    }

    #[test]
    fn initialization_gives_up() {
        let evaluator = SequentialEvaluator;
        let settings = DriverSettings {
            max_init_tries: 3,
            ..DriverSettings::default()
        };
        let driver = Driver::new(&NowhereAdmissible, &evaluator, (), settings).unwrap();
        let err = driver.initial_ensemble().unwrap_err();
        assert!(err.to_string().contains("walker 0"));
    }

    #[test]
    fn chain_summaries() {
        let mut chain = ChainTrace::empty(2, 1);
        let segment = EpochOutput {
            samples: Array3::from_shape_vec((2, 3, 1), vec![1., 2., 3., 5., 6., 7.]).unwrap(),
            log_probs: Array2::zeros((2, 3)),
            acceptance_fraction: Array1::zeros(2),
            failed_evaluations: Array1::zeros(2),
        };
        chain.append(&segment).unwrap();
        chain.append(&segment).unwrap();
        assert_eq!(chain.n_steps(), 6);
        assert_eq!(chain.last_positions().unwrap(), ndarray::array![[3.], [7.]]);

        let flat = chain.flat_samples(4);
        assert_eq!(flat, ndarray::array![[2.], [6.], [3.], [7.]]);
        assert_relative_eq!(chain.mean(4)[0], 4.5);
        assert_relative_eq!(chain.std(4)[0], (17f64 / 3.).sqrt(), epsilon = 1e-12);
        assert!(chain.std(6)[0].is_nan());
    }
}
