mod arrow;
mod core;
mod csv;
mod memory;

pub use arrow::{ArrowCheckpoint, PARAM_NAMES_KEY};
pub use csv::CsvCheckpoint;
pub use memory::{MemoryCheckpoint, StoredCheckpoint};

pub use core::{Checkpoint, CheckpointKey, CheckpointSink};
