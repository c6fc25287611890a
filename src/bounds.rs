use crate::config::ConfigError;

/// Open box of admissible hyperparameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl ParamBounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, ConfigError> {
        if lower.len() != upper.len() {
            return Err(ConfigError::DimensionMismatch {
                what: "upper bounds",
                expected: lower.len(),
                found: upper.len(),
            });
        }
        for (index, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if !(lo < hi) {
                return Err(ConfigError::EmptyBounds {
                    index,
                    lower: lo,
                    upper: hi,
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// A box without constraints on any of the `dim` coordinates.
    pub fn unbounded(dim: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; dim],
            upper: vec![f64::INFINITY; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// True iff every coordinate lies strictly inside its bounds.
    ///
    /// Vectors of the wrong length and NaN coordinates are never admissible.
    pub fn param_check(&self, params: &[f64]) -> bool {
        params.len() == self.dim()
            && params
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(&x, (&lo, &hi))| lo < x && x < hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cosmology_box() -> ParamBounds {
        ParamBounds::new(vec![50., 0.], vec![90., 1.]).unwrap()
    }

    #[test]
    fn edges_are_excluded() {
        let bounds = cosmology_box();
        assert!(bounds.param_check(&[70., 0.3]));
        assert!(!bounds.param_check(&[50., 0.3]));
        assert!(!bounds.param_check(&[90., 0.3]));
        assert!(!bounds.param_check(&[70., 0.]));
        assert!(!bounds.param_check(&[70., 1.]));
        assert!(!bounds.param_check(&[70., f64::NAN]));
        assert!(!bounds.param_check(&[70.]));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(matches!(
            ParamBounds::new(vec![0.], vec![1., 2.]),
            Err(ConfigError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn unbounded_accepts_finite_values() {
        assert!(ParamBounds::unbounded(3).param_check(&[-1e300, 0., 1e300]));
    }

    proptest! {
        #[test]
        fn any_coordinate_outside_fails(h0 in 0f64..150., om in -1f64..2.) {
            let bounds = cosmology_box();
            let inside = 50. < h0 && h0 < 90. && 0. < om && om < 1.;
            prop_assert_eq!(bounds.param_check(&[h0, om]), inside);
        }

        #[test]
        fn shrinking_toward_center_stays_inside(
            h0 in 50.001f64..89.999,
            om in 0.001f64..0.999,
            t in 0f64..1.,
        ) {
            let bounds = cosmology_box();
            prop_assert!(bounds.param_check(&[h0, om]));
            let moved = [h0 + t * (70. - h0), om + t * (0.5 - om)];
            prop_assert!(bounds.param_check(&moved));
        }
    }
}
