//! Hierarchical Bayesian inference of cosmological hyperparameters from
//! supernova catalogs.
//!
//! A [`Catalog`] holds per-object interim posteriors over `(type, z, μ)` grid
//! cells together with the interim prior and selection function they were
//! computed under. A [`Reweighter`] turns these into the marginal
//! hyperposterior of the cosmology, which the [`Driver`] samples with an
//! affine-invariant ensemble sampler until the Gelman-Rubin statistic signals
//! convergence.

pub(crate) mod bounds;
pub(crate) mod catalog;
pub(crate) mod config;
pub(crate) mod cosmology;
pub(crate) mod diagnostics;
pub(crate) mod driver;
pub(crate) mod ensemble;
pub(crate) mod evaluator;
pub(crate) mod grid;
pub(crate) mod likelihood;
pub mod math;
pub(crate) mod model;
pub(crate) mod posterior;
pub(crate) mod prior;
pub mod simulate;
pub mod storage;

pub use bounds::ParamBounds;
pub use catalog::{Catalog, CatalogError};
pub use config::{ConfigError, CosmologyConfig};
pub use cosmology::{DistanceModulus, FlatLambdaCdm, SPEED_OF_LIGHT};
pub use diagnostics::{gelman_rubin, GelmanRubin};
pub use driver::{
    ChainTrace, Driver, DriverOutput, DriverSettings, DriverState, EpochSummary,
};
pub use ensemble::{Ensemble, EnsembleSampler, EpochOutput, SamplerError, StretchMove};
pub use evaluator::{EvalFailure, Evaluation, LogpEvaluator, RayonEvaluator, SequentialEvaluator};
pub use grid::{GridAxis, GridError, GridSpace};
pub use likelihood::HyperLikelihood;
pub use model::{LogpError, Model};
pub use posterior::{cosmology_reweighter, HyperposteriorError, Reweighter, ReweighterError};
pub use prior::HyperPrior;
pub use storage::{
    ArrowCheckpoint, Checkpoint, CheckpointKey, CheckpointSink, CsvCheckpoint, MemoryCheckpoint,
};
