use ndarray::{Array3, Array4, Axis};
use thiserror::Error;

use crate::grid::{GridError, GridSpace};

/// Relative deviation from unit mass above which a shared density is reported
/// as badly normalized.
const NORMALIZATION_TOLERANCE: f64 = 1e-2;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("The type list is empty")]
    EmptyTypes,
    #[error("The catalog contains no objects")]
    NoObjects,
    #[error("Invalid grid")]
    Grid(#[from] GridError),
}

/// Interim posteriors of a survey, together with the interim prior and
/// selection function they were computed under.
///
/// All densities are natural-log values on the `[n_types][n_z][n_mu]` grid;
/// the posteriors carry an extra leading object axis. Shapes are checked once
/// here and the catalog is immutable afterwards.
#[derive(Debug, Clone)]
pub struct Catalog {
    types: Vec<String>,
    grid: GridSpace,
    interim_ln_posteriors: Array4<f64>,
    interim_ln_prior: Array3<f64>,
    ln_selection_function: Array3<f64>,
}

impl Catalog {
    pub fn new(
        types: Vec<String>,
        grid: GridSpace,
        interim_ln_posteriors: Array4<f64>,
        interim_ln_prior: Array3<f64>,
        ln_selection_function: Array3<f64>,
    ) -> Result<Self, CatalogError> {
        if types.is_empty() {
            return Err(CatalogError::EmptyTypes);
        }
        let (n_z, n_mu) = grid.shape();
        let cell_shape = [types.len(), n_z, n_mu];

        let (n_objects, n_t, n_zp, n_mup) = interim_ln_posteriors.dim();
        if [n_t, n_zp, n_mup] != cell_shape {
            return Err(CatalogError::ShapeMismatch {
                what: "interim ln posteriors",
                expected: vec![n_objects, cell_shape[0], cell_shape[1], cell_shape[2]],
                found: interim_ln_posteriors.shape().to_vec(),
            });
        }
        if n_objects == 0 {
            return Err(CatalogError::NoObjects);
        }
        if interim_ln_prior.shape() != cell_shape {
            return Err(CatalogError::ShapeMismatch {
                what: "interim ln prior",
                expected: cell_shape.to_vec(),
                found: interim_ln_prior.shape().to_vec(),
            });
        }
        if ln_selection_function.shape() != cell_shape {
            return Err(CatalogError::ShapeMismatch {
                what: "ln selection function",
                expected: cell_shape.to_vec(),
                found: ln_selection_function.shape().to_vec(),
            });
        }

        let catalog = Self {
            types,
            grid,
            interim_ln_posteriors,
            interim_ln_prior,
            ln_selection_function,
        };
        catalog.check_normalization();
        Ok(catalog)
    }

    /// Log density that is constant over the grid and integrates to one.
    pub fn flat_ln_density(grid: &GridSpace, n_types: usize) -> Array3<f64> {
        let (n_z, n_mu) = grid.shape();
        let value = -(grid.z().span() * grid.mu().span()).ln();
        Array3::from_elem((n_types, n_z, n_mu), value)
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn n_types(&self) -> usize {
        self.types.len()
    }

    pub fn n_objects(&self) -> usize {
        self.interim_ln_posteriors.len_of(Axis(0))
    }

    pub fn grid(&self) -> &GridSpace {
        &self.grid
    }

    pub fn interim_ln_posteriors(&self) -> &Array4<f64> {
        &self.interim_ln_posteriors
    }

    pub fn interim_ln_prior(&self) -> &Array3<f64> {
        &self.interim_ln_prior
    }

    pub fn ln_selection_function(&self) -> &Array3<f64> {
        &self.ln_selection_function
    }

    /// Grid integrals of the interim prior and the selection function.
    ///
    /// Both should be close to one; deviations are logged but not rejected.
    pub fn check_normalization(&self) -> (f64, f64) {
        let prior_mass = self.grid.integrate(self.interim_ln_prior.view());
        let selection_mass = self.grid.integrate(self.ln_selection_function.view());
        for (name, mass) in [
            ("interim prior", prior_mass),
            ("selection function", selection_mass),
        ] {
            if !((mass - 1.).abs() <= NORMALIZATION_TOLERANCE) {
                tracing::warn!(density = name, mass, "density does not integrate to one");
            }
        }
        (prior_mass, selection_mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridAxis;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn grid() -> GridSpace {
        GridSpace::new(
            GridAxis::linspace(0.1, 0.6, 5).unwrap(),
            GridAxis::linspace(38., 44., 4).unwrap(),
        )
    }

    fn types() -> Vec<String> {
        vec!["Ia".to_string(), "II".to_string()]
    }

    #[test]
    fn accepts_consistent_shapes() {
        let grid = grid();
        let flat = Catalog::flat_ln_density(&grid, 2);
        let catalog = Catalog::new(
            types(),
            grid,
            Array4::zeros((3, 2, 5, 4)),
            flat.clone(),
            flat,
        )
        .unwrap();
        assert_eq!(catalog.n_objects(), 3);
        assert_eq!(catalog.n_types(), 2);
        let (prior, selection) = catalog.check_normalization();
        assert_relative_eq!(prior, 1., epsilon = 1e-12);
        assert_relative_eq!(selection, 1., epsilon = 1e-12);
    }

    #[test]
    fn rejects_mismatched_posteriors() {
        let grid = grid();
        let flat = Catalog::flat_ln_density(&grid, 2);
        let err = Catalog::new(types(), grid, Array4::zeros((3, 2, 4, 4)), flat.clone(), flat)
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::ShapeMismatch {
                what: "interim ln posteriors",
                expected: vec![3, 2, 5, 4],
                found: vec![3, 2, 4, 4],
            }
        );
    }

    #[test]
    fn rejects_mismatched_selection() {
        let grid = grid();
        let flat = Catalog::flat_ln_density(&grid, 2);
        let err = Catalog::new(
            types(),
            grid,
            Array4::zeros((3, 2, 5, 4)),
            flat,
            Array3::zeros((1, 5, 4)),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::ShapeMismatch {
                what: "ln selection function",
                ..
            }
        ));
    }

    #[test]
    fn rejects_empty_inputs() {
        let grid = grid();
        let flat = Catalog::flat_ln_density(&grid, 2);
        assert_eq!(
            Catalog::new(
                vec![],
                grid.clone(),
                Array4::zeros((1, 2, 5, 4)),
                flat.clone(),
                flat.clone()
            )
            .unwrap_err(),
            CatalogError::EmptyTypes
        );
        assert_eq!(
            Catalog::new(types(), grid, Array4::zeros((0, 2, 5, 4)), flat.clone(), flat)
                .unwrap_err(),
            CatalogError::NoObjects
        );
    }
}
