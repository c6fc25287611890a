//! Synthetic survey catalogs with known true hyperparameters.

use ndarray::{Array4, ArrayViewMut3, Axis};
use rand::distr::weighted::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError};
use crate::cosmology::DistanceModulus;
use crate::grid::GridSpace;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Expected one fraction per type ({expected}), got {found}")]
    FractionCount { expected: usize, found: usize },
    #[error("Type fractions must be non-negative and not all zero")]
    InvalidFractions,
    #[error("Scatter must be positive and finite, got {0}")]
    InvalidScatter(f64),
    #[error("Type confidence must be in (0, 1], got {0}")]
    InvalidConfidence(f64),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Describes a mock survey.
///
/// Objects get a type drawn from `type_fractions`, a redshift uniform over the
/// grid and the distance modulus of `true_params`. Their interim posteriors
/// are Gaussians around the scattered observations, put `type_confidence` of
/// their mass on the true type and are computed under a flat interim prior
/// and selection function.
#[derive(Debug, Clone, PartialEq)]
pub struct MockSurvey {
    pub n_objects: usize,
    pub types: Vec<String>,
    pub type_fractions: Vec<f64>,
    pub true_params: Vec<f64>,
    pub z_scatter: f64,
    pub mu_scatter: f64,
    pub type_confidence: f64,
}

impl Default for MockSurvey {
    fn default() -> Self {
        Self {
            n_objects: 100,
            types: vec!["Ia".into(), "Ibc".into(), "II".into()],
            type_fractions: vec![0.7, 0.1, 0.2],
            true_params: vec![70., 0.3],
            z_scatter: 0.02,
            mu_scatter: 0.15,
            type_confidence: 0.8,
        }
    }
}

/// Generated catalog and the latent values behind it.
#[derive(Debug, Clone)]
pub struct MockCatalog {
    pub catalog: Catalog,
    pub true_types: Vec<usize>,
    pub true_redshifts: Vec<f64>,
    pub true_mu: Vec<f64>,
    pub observed_redshifts: Vec<f64>,
    pub observed_mu: Vec<f64>,
}

fn ln_normal_pdf(x: f64, mean: f64, std_dev: f64) -> f64 {
    let z = (x - mean) / std_dev;
    -0.5 * z * z - (std_dev * (2. * std::f64::consts::PI).sqrt()).ln()
}

impl MockSurvey {
    pub fn with_objects(mut self, n_objects: usize) -> Self {
        self.n_objects = n_objects;
        self
    }

    pub fn with_types(mut self, types: Vec<String>, fractions: Vec<f64>) -> Self {
        self.types = types;
        self.type_fractions = fractions;
        self
    }

    pub fn with_truth(mut self, true_params: Vec<f64>) -> Self {
        self.true_params = true_params;
        self
    }

    pub fn with_scatter(mut self, z_scatter: f64, mu_scatter: f64) -> Self {
        self.z_scatter = z_scatter;
        self.mu_scatter = mu_scatter;
        self
    }

    fn validate(&self) -> Result<(), SimulationError> {
        if self.type_fractions.len() != self.types.len() {
            return Err(SimulationError::FractionCount {
                expected: self.types.len(),
                found: self.type_fractions.len(),
            });
        }
        for scatter in [self.z_scatter, self.mu_scatter] {
            if !(scatter > 0.) || !scatter.is_finite() {
                return Err(SimulationError::InvalidScatter(scatter));
            }
        }
        if !(self.type_confidence > 0. && self.type_confidence <= 1.) {
            return Err(SimulationError::InvalidConfidence(self.type_confidence));
        }
        Ok(())
    }

    pub fn generate<D, R>(
        &self,
        grid: &GridSpace,
        distance: &D,
        rng: &mut R,
    ) -> Result<MockCatalog, SimulationError>
    where
        D: DistanceModulus + ?Sized,
        R: Rng + ?Sized,
    {
        self.validate()?;
        let types = WeightedIndex::new(&self.type_fractions)
            .map_err(|_| SimulationError::InvalidFractions)?;
        let z_noise = Normal::new(0., self.z_scatter)
            .map_err(|_| SimulationError::InvalidScatter(self.z_scatter))?;
        let mu_noise = Normal::new(0., self.mu_scatter)
            .map_err(|_| SimulationError::InvalidScatter(self.mu_scatter))?;

        let n_types = self.types.len();
        let (n_z, n_mu) = grid.shape();
        let z_axis = grid.z();

        let true_types: Vec<usize> = (0..self.n_objects).map(|_| types.sample(rng)).collect();
        let true_redshifts: Vec<f64> = (0..self.n_objects)
            .map(|_| rng.random_range(z_axis.lower()..z_axis.upper()))
            .collect();
        let true_mu = distance.distance_modulus(&self.true_params, &true_redshifts);
        let observed_redshifts: Vec<f64> = true_redshifts
            .iter()
            .map(|z| z + z_noise.sample(rng))
            .collect();
        let observed_mu: Vec<f64> = true_mu.iter().map(|mu| mu + mu_noise.sample(rng)).collect();

        let other_type = if n_types > 1 {
            (1. - self.type_confidence) / (n_types - 1) as f64
        } else {
            0.
        };

        let mut posteriors = Array4::zeros((self.n_objects, n_types, n_z, n_mu));
        for (object, mut density) in posteriors.axis_iter_mut(Axis(0)).enumerate() {
            for ((t, z, mu), value) in density.indexed_iter_mut() {
                let type_mass = if t == true_types[object] {
                    self.type_confidence
                } else {
                    other_type
                };
                *value = type_mass.ln()
                    + ln_normal_pdf(
                        z_axis.midpoints()[z],
                        observed_redshifts[object],
                        self.z_scatter,
                    )
                    + ln_normal_pdf(
                        grid.mu().midpoints()[mu],
                        observed_mu[object],
                        self.mu_scatter,
                    );
            }
            normalize(grid, &mut density);
        }

        let flat = Catalog::flat_ln_density(grid, n_types);
        let catalog = Catalog::new(self.types.clone(), grid.clone(), posteriors, flat.clone(), flat)?;

        Ok(MockCatalog {
            catalog,
            true_types,
            true_redshifts,
            true_mu,
            observed_redshifts,
            observed_mu,
        })
    }
}

/// Shifts a log density so that it integrates to one over the grid.
fn normalize(grid: &GridSpace, density: &mut ArrayViewMut3<f64>) {
    let log_mass = grid.log_integrate(density.view());
    if !log_mass.is_finite() {
        return;
    }
    density.mapv_inplace(|x| x - log_mass);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::FlatLambdaCdm;
    use crate::grid::GridAxis;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn grid() -> GridSpace {
        GridSpace::new(
            GridAxis::linspace(0.05, 0.65, 12).unwrap(),
            GridAxis::linspace(37., 44., 28).unwrap(),
        )
    }

    #[test]
    fn interim_posteriors_are_normalized() {
        let survey = MockSurvey::default().with_objects(20);
        let mock = survey
            .generate(&grid(), &FlatLambdaCdm::default(), &mut ChaCha8Rng::seed_from_u64(3))
            .unwrap();
        let catalog = &mock.catalog;
        assert_eq!(catalog.n_objects(), 20);
        assert_eq!(catalog.n_types(), 3);
        for object in catalog.interim_ln_posteriors().outer_iter() {
            assert_relative_eq!(catalog.grid().integrate(object), 1., epsilon = 1e-9);
        }
        assert!(mock.true_types.iter().all(|&t| t < 3));
        assert!(mock
            .true_redshifts
            .iter()
            .all(|&z| (0.05..0.65).contains(&z)));
    }

    #[test]
    fn type_mass_follows_confidence() {
        let survey = MockSurvey::default().with_objects(1);
        let mock = survey
            .generate(&grid(), &FlatLambdaCdm::default(), &mut ChaCha8Rng::seed_from_u64(8))
            .unwrap();
        let object = mock.catalog.interim_ln_posteriors().index_axis(Axis(0), 0);
        let true_type = mock.true_types[0];
        let other = (true_type + 1) % 3;
        let ratio = object[[true_type, 4, 10]] - object[[other, 4, 10]];
        assert_relative_eq!(ratio, (0.8f64 / 0.1).ln(), epsilon = 1e-6);
    }

    #[test]
    fn same_seed_same_catalog() {
        let survey = MockSurvey::default().with_objects(5);
        let grid = grid();
        let a = survey
            .generate(&grid, &FlatLambdaCdm::default(), &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        let b = survey
            .generate(&grid, &FlatLambdaCdm::default(), &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        assert_eq!(
            a.catalog.interim_ln_posteriors(),
            b.catalog.interim_ln_posteriors()
        );
        assert_eq!(a.observed_mu, b.observed_mu);
    }

    #[test]
    fn rejects_bad_configuration() {
        let grid = grid();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let survey = MockSurvey::default().with_types(vec!["Ia".into()], vec![0.5, 0.5]);
        assert!(matches!(
            survey.generate(&grid, &FlatLambdaCdm::default(), &mut rng),
            Err(SimulationError::FractionCount { expected: 1, found: 2 })
        ));
        let survey = MockSurvey::default().with_types(vec!["Ia".into()], vec![0.]);
        assert!(matches!(
            survey.generate(&grid, &FlatLambdaCdm::default(), &mut rng),
            Err(SimulationError::InvalidFractions)
        ));
        let survey = MockSurvey::default().with_scatter(0., 0.1);
        assert!(matches!(
            survey.generate(&grid, &FlatLambdaCdm::default(), &mut rng),
            Err(SimulationError::InvalidScatter(_))
        ));
    }
}
