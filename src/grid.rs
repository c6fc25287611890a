//! Discretization of the redshift and distance-modulus axes.

use ndarray::{Array2, Array3, ArrayView3, Axis};
use thiserror::Error;

use crate::math::{exp_dot, log_exp_dot};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("A grid axis needs at least two bin edges, got {0}")]
    TooFewEdges(usize),
    #[error("Bin edges must be strictly increasing (violated at edge {index})")]
    NotIncreasing { index: usize },
    #[error("Bin edge {index} is not finite")]
    NonFinite { index: usize },
}

/// An ordered set of bins on one axis.
///
/// Stores the edges together with the derived widths and midpoints, which are
/// looked up on every likelihood evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    edges: Vec<f64>,
    widths: Vec<f64>,
    midpoints: Vec<f64>,
}

impl GridAxis {
    pub fn new(edges: Vec<f64>) -> Result<Self, GridError> {
        if edges.len() < 2 {
            return Err(GridError::TooFewEdges(edges.len()));
        }
        if let Some(index) = edges.iter().position(|edge| !edge.is_finite()) {
            return Err(GridError::NonFinite { index });
        }
        if let Some(index) = edges.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(GridError::NotIncreasing { index: index + 1 });
        }

        let widths = edges.windows(2).map(|pair| pair[1] - pair[0]).collect();
        let midpoints = edges.windows(2).map(|pair| 0.5 * (pair[0] + pair[1])).collect();
        Ok(Self {
            edges,
            widths,
            midpoints,
        })
    }

    /// `n_bins` equal-width bins spanning `[lower, upper]`.
    pub fn linspace(lower: f64, upper: f64, n_bins: usize) -> Result<Self, GridError> {
        let step = (upper - lower) / n_bins as f64;
        let edges = (0..=n_bins)
            .map(|i| if i == n_bins { upper } else { lower + step * i as f64 })
            .collect();
        Self::new(edges)
    }

    pub fn n_bins(&self) -> usize {
        self.widths.len()
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    pub fn midpoints(&self) -> &[f64] {
        &self.midpoints
    }

    pub fn lower(&self) -> f64 {
        self.edges[0]
    }

    pub fn upper(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    pub fn span(&self) -> f64 {
        self.upper() - self.lower()
    }

    /// Index of the bin whose lower edge is the nearest edge at or below `value`.
    ///
    /// The upper edge itself belongs to the last bin. Values outside the axis
    /// (and NaN) have no bin.
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        if !(value >= self.lower() && value <= self.upper()) {
            return None;
        }
        let above = self.edges.partition_point(|&edge| edge <= value);
        Some((above - 1).min(self.n_bins() - 1))
    }
}

/// The two-dimensional (redshift, distance modulus) grid shared by every
/// density in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpace {
    z: GridAxis,
    mu: GridAxis,
}

impl GridSpace {
    pub fn new(z: GridAxis, mu: GridAxis) -> Self {
        Self { z, mu }
    }

    pub fn z(&self) -> &GridAxis {
        &self.z
    }

    pub fn mu(&self) -> &GridAxis {
        &self.mu
    }

    /// `(n_z, n_mu)`
    pub fn shape(&self) -> (usize, usize) {
        (self.z.n_bins(), self.mu.n_bins())
    }

    /// `Δz_i · Δμ_j` for every cell.
    pub fn cell_areas(&self) -> Array2<f64> {
        let (n_z, n_mu) = self.shape();
        Array2::from_shape_fn((n_z, n_mu), |(i, j)| self.z.widths[i] * self.mu.widths[j])
    }

    /// Integration weights over `[n_types][n_z][n_mu]`: the cell area divided
    /// evenly across types.
    pub fn cell_weights(&self, n_types: usize) -> Array3<f64> {
        let areas = self.cell_areas() / n_types as f64;
        let (n_z, n_mu) = self.shape();
        let mut weights = Array3::zeros((n_types, n_z, n_mu));
        weights.axis_iter_mut(Axis(0)).for_each(|mut plane| plane.assign(&areas));
        weights
    }

    /// `Σ_t Σ_z Σ_μ exp(x) · Δz · Δμ / n_types` for a log density over
    /// `[n_types][n_z][n_mu]`.
    pub fn integrate(&self, log_density: ArrayView3<f64>) -> f64 {
        let n_types = log_density.len_of(Axis(0));
        let weights = self.cell_weights(n_types);
        let values = log_density.as_standard_layout();
        let (Some(values), Some(weights)) = (values.as_slice(), weights.as_slice()) else {
            unreachable!("standard layout arrays are contiguous");
        };
        exp_dot(values, weights)
    }

    /// Logarithm of [`GridSpace::integrate`], computed without leaving log
    /// space.
    pub fn log_integrate(&self, log_density: ArrayView3<f64>) -> f64 {
        let n_types = log_density.len_of(Axis(0));
        let weights = self.cell_weights(n_types);
        let values = log_density.as_standard_layout();
        let (Some(values), Some(weights)) = (values.as_slice(), weights.as_slice()) else {
            unreachable!("standard layout arrays are contiguous");
        };
        log_exp_dot(values, weights)
    }
}
