use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    Array, ArrayBuilder, ArrayRef, FixedSizeListBuilder, Float64Builder, RecordBatch,
    UInt64Builder,
};
use arrow::datatypes::{Field, Schema};

use crate::storage::{Checkpoint, CheckpointKey, CheckpointSink};

/// Schema metadata entry holding the comma separated parameter names.
pub const PARAM_NAMES_KEY: &str = "param_names";

/// Collects checkpoints as Arrow record batches.
///
/// Each batch has one row per walker and draw with the columns `walker`,
/// `draw`, `lp`, `position` (a fixed size list of the parameters) and
/// `acceptance`, the acceptance fraction of the row's walker, which is null
/// when the checkpoint has none.
#[derive(Debug, Clone, Default)]
pub struct ArrowCheckpoint {
    batches: BTreeMap<CheckpointKey, RecordBatch>,
}

impl ArrowCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CheckpointKey) -> Option<&RecordBatch> {
        self.batches.get(&key)
    }

    pub fn into_batches(self) -> BTreeMap<CheckpointKey, RecordBatch> {
        self.batches
    }
}

fn to_record_batch(checkpoint: &Checkpoint<'_>) -> Result<RecordBatch> {
    let n_rows = checkpoint.n_walkers() * checkpoint.n_steps();
    let dim = checkpoint.dim();

    let mut walkers = UInt64Builder::with_capacity(n_rows);
    let mut draws = UInt64Builder::with_capacity(n_rows);
    let mut log_probs = Float64Builder::with_capacity(n_rows);
    let mut acceptance = Float64Builder::with_capacity(n_rows);
    let items = Float64Builder::with_capacity(n_rows * dim);
    let mut positions = FixedSizeListBuilder::new(items, dim as _);

    for (walker, (trace, lps)) in checkpoint
        .samples
        .outer_iter()
        .zip(checkpoint.log_probs.outer_iter())
        .enumerate()
    {
        let walker_acceptance = checkpoint.acceptance.map(|a| a[walker]);
        for (draw, (position, &lp)) in trace.outer_iter().zip(lps.iter()).enumerate() {
            walkers.append_value(walker as u64);
            draws.append_value(draw as u64);
            log_probs.append_value(lp);
            acceptance.append_option(walker_acceptance);
            position
                .iter()
                .for_each(|&x| positions.values().append_value(x));
            positions.append(true);
        }
    }

    let columns: Vec<(&str, ArrayRef)> = vec![
        ("walker", Arc::new(walkers.finish())),
        ("draw", Arc::new(draws.finish())),
        ("lp", Arc::new(log_probs.finish())),
        ("position", ArrayBuilder::finish(&mut positions)),
        ("acceptance", Arc::new(acceptance.finish())),
    ];
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), array.null_count() > 0))
        .collect();
    let metadata = HashMap::from([(
        PARAM_NAMES_KEY.to_string(),
        checkpoint.param_names.join(","),
    )]);
    let schema = Schema::new(fields).with_metadata(metadata);

    RecordBatch::try_new(
        Arc::new(schema),
        columns.into_iter().map(|(_, array)| array).collect(),
    )
    .context("Could not convert checkpoint to RecordBatch")
}

impl CheckpointSink for ArrowCheckpoint {
    fn record(&mut self, key: CheckpointKey, checkpoint: Checkpoint<'_>) -> Result<()> {
        let batch = to_record_batch(&checkpoint)?;
        self.batches.insert(key, batch);
        Ok(())
    }
}
