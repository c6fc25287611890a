use ndarray::{Array2, Array3, Axis};

use crate::bounds::ParamBounds;
use crate::cosmology::DistanceModulus;
use crate::grid::GridSpace;
use crate::math::{safe_log, LOG_EPSILON};

/// Log density of the latent `(type, z, μ)` cells given hyperparameters.
///
/// For each redshift bin all mass sits in the distance-modulus bin containing
/// the cosmology's prediction at the bin midpoint, identically for every type.
/// The density is normalized over the whole grid with type-uniform weights.
/// Hyperparameters outside the admissible box produce a constant floor-valued
/// density instead of an error.
pub struct HyperLikelihood<D> {
    grid: GridSpace,
    n_types: usize,
    bounds: ParamBounds,
    distance: D,
}

impl<D: DistanceModulus> HyperLikelihood<D> {
    pub fn new(grid: GridSpace, n_types: usize, bounds: ParamBounds, distance: D) -> Self {
        assert!(n_types > 0);
        Self {
            grid,
            n_types,
            bounds,
            distance,
        }
    }

    pub fn grid(&self) -> &GridSpace {
        &self.grid
    }

    pub fn n_types(&self) -> usize {
        self.n_types
    }

    pub fn bounds(&self) -> &ParamBounds {
        &self.bounds
    }

    pub fn dim(&self) -> usize {
        self.bounds.dim()
    }

    /// `[n_types][n_z][n_mu]` log density.
    pub fn log_hyperlikelihood(&self, params: &[f64]) -> Array3<f64> {
        let plane = self.log_density_plane(params);
        let (n_z, n_mu) = plane.dim();
        let mut density = Array3::zeros((self.n_types, n_z, n_mu));
        density
            .axis_iter_mut(Axis(0))
            .for_each(|mut layer| layer.assign(&plane));
        density
    }

    /// The `[n_z][n_mu]` plane shared by every type.
    pub(crate) fn log_density_plane(&self, params: &[f64]) -> Array2<f64> {
        if !self.bounds.param_check(params) {
            return self.flat_plane();
        }
        match self.indicator(params) {
            Some((indicator, mass)) => indicator.mapv(|x| safe_log(x / mass)),
            None => self.flat_plane(),
        }
    }

    /// The fallback density for inadmissible hyperparameters.
    pub fn flat(&self) -> Array3<f64> {
        let (n_z, n_mu) = self.grid.shape();
        Array3::from_elem((self.n_types, n_z, n_mu), LOG_EPSILON)
    }

    fn flat_plane(&self) -> Array2<f64> {
        Array2::from_elem(self.grid.shape(), LOG_EPSILON)
    }

    /// One-hot `[n_z][n_mu]` indicator of the predicted distance modulus and
    /// its grid mass `Σ_z Δz Δμ`, or `None` if no prediction lands on the grid.
    /// A calculator returning the wrong number of predictions counts as none
    /// landing.
    fn indicator(&self, params: &[f64]) -> Option<(Array2<f64>, f64)> {
        let z_axis = self.grid.z();
        let mu_axis = self.grid.mu();
        let predicted = self.distance.distance_modulus(params, z_axis.midpoints());
        if predicted.len() != z_axis.n_bins() {
            return None;
        }

        let mut indicator = Array2::zeros(self.grid.shape());
        let mut mass = 0f64;
        for (z_idx, &mu) in predicted.iter().enumerate() {
            let Some(mu_idx) = mu_axis.bin_index(mu) else {
                continue;
            };
            indicator[[z_idx, mu_idx]] = 1.;
            mass += z_axis.widths()[z_idx] * mu_axis.widths()[mu_idx];
        }
        (mass > 0.).then_some((indicator, mass))
    }
}
