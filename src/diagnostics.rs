//! Gelman-Rubin potential scale reduction for walker ensembles.

use ndarray::{s, Array1, ArrayView3, Axis};

/// Per-parameter Gelman-Rubin statistic and its ingredients.
///
/// Each walker is treated as one chain. Only the second half of every chain
/// enters the computation.
#[derive(Debug, Clone, PartialEq)]
pub struct GelmanRubin {
    /// Mean of the per-walker sample variances.
    pub within: Array1<f64>,
    /// `n` times the sample variance of the per-walker means.
    pub between: Array1<f64>,
    /// `(n - 1) / n W + B / n`
    pub pooled_variance: Array1<f64>,
    pub r_hat: Array1<f64>,
    /// Iterations per walker that entered the computation.
    pub n_kept: usize,
}

impl GelmanRubin {
    /// Computes the statistic on `chain` with layout `[walker][step][param]`
    /// after discarding the first half of the steps.
    pub fn compute(chain: ArrayView3<f64>) -> Self {
        let n_steps = chain.len_of(Axis(1));
        Self::from_kept(chain.slice(s![.., n_steps / 2.., ..]))
    }

    /// Computes the statistic on every step of `kept`.
    ///
    /// With fewer than two walkers or two steps R̂ is `+∞`. A parameter
    /// without any within-walker spread has R̂ of one if the walkers agree
    /// and `+∞` if they do not.
    pub fn from_kept(kept: ArrayView3<f64>) -> Self {
        let (n_walkers, n, dim) = kept.dim();
        if n_walkers < 2 || n < 2 {
            let nan = Array1::from_elem(dim, f64::NAN);
            return Self {
                within: nan.clone(),
                between: nan.clone(),
                pooled_variance: nan,
                r_hat: Array1::from_elem(dim, f64::INFINITY),
                n_kept: n,
            };
        }

        let n_f = n as f64;
        let mut within = Array1::<f64>::zeros(dim);
        let mut between = Array1::<f64>::zeros(dim);
        for (param, trace) in kept.axis_iter(Axis(2)).enumerate() {
            let Some(means) = trace.mean_axis(Axis(1)) else {
                unreachable!("chains are not empty");
            };
            within[param] = trace.var_axis(Axis(1), 1.).mean().unwrap_or(f64::NAN);
            between[param] = n_f * means.var(1.);
        }

        let pooled_variance = (n_f - 1.) / n_f * &within + &between / n_f;
        let r_hat = ndarray::Zip::from(&pooled_variance)
            .and(&within)
            .and(&between)
            .map_collect(|&var, &w, &b| r_hat(var, w, b));

        Self {
            within,
            between,
            pooled_variance,
            r_hat,
            n_kept: n,
        }
    }

    pub fn max_r_hat(&self) -> f64 {
        self.r_hat.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// True if every parameter's R̂ is at most `threshold`.
    pub fn is_converged(&self, threshold: f64) -> bool {
        !self.r_hat.is_empty() && self.r_hat.iter().all(|&r| r <= threshold)
    }
}

fn r_hat(pooled_variance: f64, within: f64, between: f64) -> f64 {
    if within > 0. {
        (pooled_variance / within).sqrt()
    } else if between == 0. {
        1.
    } else {
        f64::INFINITY
    }
}

/// R̂ for every parameter of `chain`, see [`GelmanRubin::compute`].
pub fn gelman_rubin(chain: ArrayView3<f64>) -> Array1<f64> {
    GelmanRubin::compute(chain).r_hat
}
