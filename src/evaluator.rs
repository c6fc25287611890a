//! Batch evaluation of the log density for a set of walker positions.
//!
//! The ensemble sampler hands every proposal of a half-step to a
//! [`LogpEvaluator`] at once. Implementations decide how the evaluations are
//! scheduled; a failure in one evaluation never affects the others.

use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::{Context, Result};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};

use crate::model::Model;

/// Why the log density of a single position could not be computed.
#[derive(Debug)]
pub enum EvalFailure<E> {
    /// The model returned an error.
    Logp(E),
    /// The model panicked; carries the panic message.
    Panic(String),
}

pub type Evaluation<E> = std::result::Result<f64, EvalFailure<E>>;

pub trait LogpEvaluator: Send + Sync {
    /// Evaluates `model` at every position, returning one result per position
    /// in the same order.
    fn evaluate<M: Model>(
        &self,
        model: &M,
        positions: &[Vec<f64>],
    ) -> Vec<Evaluation<M::LogpError>>;
}

fn evaluate_one<M: Model>(model: &M, position: &[f64]) -> Evaluation<M::LogpError> {
    match catch_unwind(AssertUnwindSafe(|| model.logp(position))) {
        Ok(Ok(logp)) => Ok(logp),
        Ok(Err(err)) => Err(EvalFailure::Logp(err)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|msg| msg.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(EvalFailure::Panic(message))
        }
    }
}

/// Evaluates positions one after the other on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEvaluator;

impl LogpEvaluator for SequentialEvaluator {
    fn evaluate<M: Model>(
        &self,
        model: &M,
        positions: &[Vec<f64>],
    ) -> Vec<Evaluation<M::LogpError>> {
        positions
            .iter()
            .map(|position| evaluate_one(model, position))
            .collect()
    }
}

/// Evaluates positions in parallel on a rayon thread pool.
pub struct RayonEvaluator {
    pool: Option<ThreadPool>,
}

impl RayonEvaluator {
    /// Uses a dedicated pool with `num_threads` workers.
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("logp-worker-{}", i))
            .build()
            .context("Could not build the evaluation thread pool")?;
        Ok(Self { pool: Some(pool) })
    }

    /// Uses rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }
}

impl LogpEvaluator for RayonEvaluator {
    fn evaluate<M: Model>(
        &self,
        model: &M,
        positions: &[Vec<f64>],
    ) -> Vec<Evaluation<M::LogpError>> {
        let run = || {
            positions
                .par_iter()
                .map(|position| evaluate_one(model, position))
                .collect()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_logps::{HalfPlaneLogp, NormalLogp};
    use crate::model::LogpError;
    use anyhow::Result;
    use rand::Rng;

    struct PanickyLogp;

    impl Model for PanickyLogp {
        type LogpError = <NormalLogp as Model>::LogpError;

        fn dim(&self) -> usize {
            1
        }

        fn logp(&self, position: &[f64]) -> std::result::Result<f64, Self::LogpError> {
            if position[0] > 1. {
                panic!("cosmology blew up at {}", position[0]);
            }
            Ok(0.)
        }

        fn init_position<R: Rng + ?Sized>(&self, _rng: &mut R, _position: &mut [f64]) -> Result<()> {
            Ok(())
        }
    }

    fn positions() -> Vec<Vec<f64>> {
        vec![vec![0., 1.], vec![-1., 1.], vec![2., 2.], vec![-3., 0.]]
    }

    #[test]
    fn parallel_matches_sequential() {
        let model = NormalLogp {
            dim: 2,
            mu: 1.,
            sigma: 2.,
        };
        let positions = positions();
        let sequential: Vec<f64> = SequentialEvaluator
            .evaluate(&model, &positions)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let parallel: Vec<f64> = RayonEvaluator::new(2)
            .unwrap()
            .evaluate(&model, &positions)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn failures_are_isolated() {
        let model = HalfPlaneLogp { recoverable: true };
        let results = RayonEvaluator::global().evaluate(&model, &positions());
        assert!(results[0].is_ok());
        assert!(matches!(&results[1], Err(EvalFailure::Logp(err)) if err.is_recoverable()));
        assert!(results[2].is_ok());
        assert!(results[3].is_err());
    }

    #[test]
    fn panics_are_isolated() {
        let results = RayonEvaluator::new(2)
            .unwrap()
            .evaluate(&PanickyLogp, &[vec![0.], vec![5.], vec![0.5]]);
        assert!(results[0].is_ok());
        assert!(matches!(&results[1], Err(EvalFailure::Panic(msg)) if msg.contains("blew up")));
        assert!(results[2].is_ok());
    }
}
