use std::collections::BTreeMap;

use anyhow::Result;
use ndarray::{Array1, Array2, Array3};

use crate::storage::{Checkpoint, CheckpointKey, CheckpointSink};

/// Owned copy of a recorded checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub samples: Array3<f64>,
    pub log_probs: Array2<f64>,
    pub acceptance: Option<Array1<f64>>,
    pub param_names: Vec<String>,
}

/// Keeps every checkpoint in memory, replacing earlier records with the same
/// key.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpoint {
    records: BTreeMap<CheckpointKey, StoredCheckpoint>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CheckpointKey) -> Option<&StoredCheckpoint> {
        self.records.get(&key)
    }

    /// Recorded keys in order, burn-in epochs first.
    pub fn keys(&self) -> impl Iterator<Item = CheckpointKey> + '_ {
        self.records.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> BTreeMap<CheckpointKey, StoredCheckpoint> {
        self.records
    }
}

impl CheckpointSink for MemoryCheckpoint {
    fn record(&mut self, key: CheckpointKey, checkpoint: Checkpoint<'_>) -> Result<()> {
        let stored = StoredCheckpoint {
            samples: checkpoint.samples.to_owned(),
            log_probs: checkpoint.log_probs.to_owned(),
            acceptance: checkpoint.acceptance.map(|a| a.to_owned()),
            param_names: checkpoint.param_names.to_vec(),
        };
        self.records.insert(key, stored);
        Ok(())
    }
}
