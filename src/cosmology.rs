//! Distance-modulus calculators.
//!
//! The reweighting only needs the map `z -> μ` for a given hyperparameter
//! vector, so the calculator is a trait. [`FlatLambdaCdm`] is the reference
//! implementation for a flat universe parametrized by `[H0, Ωm]`; any
//! `Fn(&[f64], &[f64]) -> Vec<f64>` can be used instead.

use crate::math::safe_log;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT: f64 = 299_792.458;

pub trait DistanceModulus: Send + Sync {
    /// Distance modulus at every redshift in `redshifts`, for the cosmology
    /// described by `params`.
    ///
    /// Parameter vectors an implementation cannot interpret give NaN, which
    /// falls outside every grid.
    fn distance_modulus(&self, params: &[f64], redshifts: &[f64]) -> Vec<f64>;
}

impl<F> DistanceModulus for F
where
    F: Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync,
{
    fn distance_modulus(&self, params: &[f64], redshifts: &[f64]) -> Vec<f64> {
        self(params, redshifts)
    }
}

/// Flat ΛCDM cosmology, `params = [H0 (km/s/Mpc), Ωm]`.
#[derive(Debug, Clone, Copy)]
pub struct FlatLambdaCdm {
    /// Number of Simpson intervals per comoving-distance integral. Must be even.
    intervals: usize,
}

impl Default for FlatLambdaCdm {
    fn default() -> Self {
        Self { intervals: 128 }
    }
}

impl FlatLambdaCdm {
    pub fn with_intervals(intervals: usize) -> Self {
        let intervals = intervals.max(2);
        Self {
            intervals: intervals + intervals % 2,
        }
    }

    fn inv_efunc(omega_m: f64, z: f64) -> f64 {
        let zp1 = 1. + z;
        1. / (omega_m * zp1 * zp1 * zp1 + (1. - omega_m)).sqrt()
    }

    /// Line-of-sight comoving distance in units of the Hubble distance.
    fn comoving_integral(&self, omega_m: f64, z: f64) -> f64 {
        if z <= 0. {
            return 0.;
        }
        let n = self.intervals;
        let h = z / n as f64;
        let interior: f64 = (1..n)
            .map(|i| {
                let weight = if i % 2 == 1 { 4. } else { 2. };
                weight * Self::inv_efunc(omega_m, h * i as f64)
            })
            .sum();
        let ends = Self::inv_efunc(omega_m, 0.) + Self::inv_efunc(omega_m, z);
        h / 3. * (ends + interior)
    }

    /// Luminosity distance in Mpc.
    pub fn luminosity_distance(&self, hubble_constant: f64, omega_m: f64, z: f64) -> f64 {
        let hubble_distance = SPEED_OF_LIGHT / hubble_constant;
        (1. + z) * hubble_distance * self.comoving_integral(omega_m, z)
    }
}

impl DistanceModulus for FlatLambdaCdm {
    fn distance_modulus(&self, params: &[f64], redshifts: &[f64]) -> Vec<f64> {
        let &[hubble_constant, omega_m] = params else {
            return vec![f64::NAN; redshifts.len()];
        };
        redshifts
            .iter()
            .map(|&z| {
                let distance = self.luminosity_distance(hubble_constant, omega_m, z);
                5. * safe_log(distance) / std::f64::consts::LN_10 + 25.
            })
            .collect()
    }
}
