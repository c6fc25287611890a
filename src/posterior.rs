//! Importance reweighting of interim posteriors into the hyperposterior.

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Array4, Axis};
use rand::Rng;
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError};
use crate::config::{ConfigError, CosmologyConfig};
use crate::cosmology::DistanceModulus;
use crate::likelihood::HyperLikelihood;
use crate::math::{clamp_log, clamp_log_inplace, log_exp_dot, logaddexp, shifted_log_sum_exp};
use crate::model::{LogpError, Model};
use crate::prior::HyperPrior;

#[derive(Error, Debug)]
pub enum ReweighterError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Interim posterior of object {object} has no finite mass on the grid (log mass {log_mass})")]
    DegenerateObject { object: usize, log_mass: f64 },
}

/// The hyperposterior never fails; every input maps to a finite value.
#[derive(Error, Debug)]
pub enum HyperposteriorError {}

impl LogpError for HyperposteriorError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Marginal hyperposterior of a catalog.
///
/// Holds `clamp_log(ln posterior − ln interim prior − ln selection)` for every
/// object and cell, computed once at construction and read-only afterwards,
/// so a single `Reweighter` can be shared by all walker evaluations.
pub struct Reweighter<D> {
    constant_term: Array4<f64>,
    /// `Δz Δμ / n_types` on the `[n_z][n_mu]` plane.
    weights: Array2<f64>,
    likelihood: HyperLikelihood<D>,
    prior: HyperPrior,
    param_names: Vec<String>,
}

impl<D: DistanceModulus> Reweighter<D> {
    pub fn new(
        catalog: &Catalog,
        likelihood: HyperLikelihood<D>,
        prior: HyperPrior,
    ) -> Result<Self, ReweighterError> {
        if likelihood.grid() != catalog.grid() {
            let (n_z, n_mu) = catalog.grid().shape();
            let (l_z, l_mu) = likelihood.grid().shape();
            return Err(CatalogError::ShapeMismatch {
                what: "hyperlikelihood grid",
                expected: vec![n_z, n_mu],
                found: vec![l_z, l_mu],
            }
            .into());
        }
        if likelihood.n_types() != catalog.n_types() {
            return Err(CatalogError::ShapeMismatch {
                what: "hyperlikelihood types",
                expected: vec![catalog.n_types()],
                found: vec![likelihood.n_types()],
            }
            .into());
        }
        if prior.dim() != likelihood.dim() {
            return Err(ConfigError::DimensionMismatch {
                what: "hyperprior factors",
                expected: likelihood.dim(),
                found: prior.dim(),
            }
            .into());
        }

        let shared = catalog.interim_ln_prior() + catalog.ln_selection_function();
        let mut constant_term = catalog.interim_ln_posteriors() - &shared;
        clamp_log_inplace(&mut constant_term);

        let weights = catalog.grid().cell_areas() / catalog.n_types() as f64;
        let param_names = (0..prior.dim()).map(|i| format!("theta_{}", i)).collect();

        let reweighter = Self {
            constant_term,
            weights,
            likelihood,
            prior,
            param_names,
        };
        if let Some((object, &log_mass)) = reweighter
            .constant_log_masses()
            .iter()
            .enumerate()
            .find(|(_, log_mass)| !log_mass.is_finite())
        {
            return Err(ReweighterError::DegenerateObject { object, log_mass });
        }
        Ok(reweighter)
    }

    pub fn with_param_names(mut self, names: Vec<String>) -> Result<Self, ConfigError> {
        if names.len() != self.prior.dim() {
            return Err(ConfigError::DimensionMismatch {
                what: "parameter names",
                expected: self.prior.dim(),
                found: names.len(),
            });
        }
        self.param_names = names;
        Ok(self)
    }

    pub fn constant_term(&self) -> &Array4<f64> {
        &self.constant_term
    }

    pub fn likelihood(&self) -> &HyperLikelihood<D> {
        &self.likelihood
    }

    pub fn prior(&self) -> &HyperPrior {
        &self.prior
    }

    pub fn n_objects(&self) -> usize {
        self.constant_term.len_of(Axis(0))
    }

    /// `ln ∫ exp(constant_term + ln hyperlikelihood)` for every object.
    pub fn object_log_marginals(&self, params: &[f64]) -> Array1<f64> {
        let plane = self.likelihood.log_density_plane(params);
        let plane = plane.as_standard_layout();
        let weights = self.weights.as_standard_layout();
        let (Some(plane), Some(weights)) = (plane.as_slice(), weights.as_slice()) else {
            unreachable!("standard layout arrays are contiguous");
        };

        self.constant_term
            .outer_iter()
            .map(|object| {
                let log_integral = object
                    .outer_iter()
                    .map(|per_type| {
                        let per_type = per_type.as_standard_layout();
                        let values = per_type
                            .as_slice()
                            .expect("standard layout arrays are contiguous");
                        shifted_log_sum_exp(values, plane, weights)
                    })
                    .fold(f64::NEG_INFINITY, logaddexp);
                clamp_log(log_integral)
            })
            .collect()
    }

    /// Marginal log-likelihood of the hyperparameters given the catalog.
    pub fn log_posterior(&self, params: &[f64]) -> f64 {
        self.object_log_marginals(params).sum()
    }

    /// `max(ln hyperprior + ln marginal likelihood, LOG_EPSILON)`.
    pub fn log_hyperposterior(&self, params: &[f64]) -> f64 {
        clamp_log(self.prior.log_prob(params) + self.log_posterior(params))
    }

    /// Log of the grid mass of `exp(constant_term)` for every object.
    pub fn constant_log_masses(&self) -> Array1<f64> {
        let weights = self.weights.as_standard_layout();
        let weights = weights
            .as_slice()
            .expect("standard layout arrays are contiguous");
        self.constant_term
            .outer_iter()
            .map(|object| {
                object
                    .outer_iter()
                    .map(|per_type| {
                        let per_type = per_type.as_standard_layout();
                        let values = per_type
                            .as_slice()
                            .expect("standard layout arrays are contiguous");
                        log_exp_dot(values, weights)
                    })
                    .fold(f64::NEG_INFINITY, logaddexp)
            })
            .collect()
    }
}

impl<D: DistanceModulus> Model for Reweighter<D> {
    type LogpError = HyperposteriorError;

    fn dim(&self) -> usize {
        self.prior.dim()
    }

    fn logp(&self, position: &[f64]) -> Result<f64, HyperposteriorError> {
        Ok(self.log_hyperposterior(position))
    }

    fn init_position<R: Rng + ?Sized>(&self, rng: &mut R, position: &mut [f64]) -> Result<()> {
        anyhow::ensure!(position.len() == self.dim(), "position has the wrong length");
        self.prior.sample_into(rng, position);
        Ok(())
    }

    fn is_admissible(&self, position: &[f64]) -> bool {
        self.likelihood.bounds().param_check(position)
    }

    fn param_names(&self) -> Vec<String> {
        self.param_names.clone()
    }
}

/// Builds a reweighter for the flat cosmology described by `config`.
pub fn cosmology_reweighter<D: DistanceModulus>(
    catalog: &Catalog,
    config: &CosmologyConfig,
    distance: D,
) -> Result<Reweighter<D>> {
    let bounds = config.bounds().context("Invalid admissible box")?;
    let prior = config.hyperprior().context("Invalid hyperprior")?;
    let likelihood = HyperLikelihood::new(
        catalog.grid().clone(),
        catalog.n_types(),
        bounds,
        distance,
    );
    let reweighter = Reweighter::new(catalog, likelihood, prior)
        .context("Catalog does not match the hyperlikelihood")?;
    reweighter
        .with_param_names(config.param_names())
        .context("Parameter names do not match the hyperprior")
}
