use std::fmt;

use anyhow::Result;
use ndarray::{ArrayView1, ArrayView2, ArrayView3};

/// Identifies one recorded chain snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckpointKey {
    /// The segment sampled during the given burn-in epoch.
    Epoch(usize),
    /// The full chain, burn-in included, after the production run.
    Final,
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointKey::Epoch(epoch) => write!(f, "epoch_{:04}", epoch),
            CheckpointKey::Final => write!(f, "final"),
        }
    }
}

/// Borrowed view of a chain to be persisted.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint<'a> {
    /// `[walker][step][param]`
    pub samples: ArrayView3<'a, f64>,
    /// `[walker][step]`
    pub log_probs: ArrayView2<'a, f64>,
    /// Per-walker acceptance fraction of the run that produced the chain.
    pub acceptance: Option<ArrayView1<'a, f64>>,
    pub param_names: &'a [String],
}

impl Checkpoint<'_> {
    pub fn n_walkers(&self) -> usize {
        self.samples.dim().0
    }

    pub fn n_steps(&self) -> usize {
        self.samples.dim().1
    }

    pub fn dim(&self) -> usize {
        self.samples.dim().2
    }
}

/// Destination for chain snapshots.
///
/// The driver records every burn-in segment as soon as it is sampled and the
/// full chain once at the end. A failing sink aborts the run.
pub trait CheckpointSink: Send {
    fn record(&mut self, key: CheckpointKey, checkpoint: Checkpoint<'_>) -> Result<()>;

    /// Flush any buffered data to ensure all checkpoints are stored.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards every checkpoint.
impl CheckpointSink for () {
    fn record(&mut self, _key: CheckpointKey, _checkpoint: Checkpoint<'_>) -> Result<()> {
        Ok(())
    }
}

impl<S: CheckpointSink + ?Sized> CheckpointSink for Box<S> {
    fn record(&mut self, key: CheckpointKey, checkpoint: Checkpoint<'_>) -> Result<()> {
        (**self).record(key, checkpoint)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl<S: CheckpointSink + ?Sized> CheckpointSink for &mut S {
    fn record(&mut self, key: CheckpointKey, checkpoint: Checkpoint<'_>) -> Result<()> {
        (**self).record(key, checkpoint)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}
