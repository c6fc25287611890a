//! CSV checkpoint backend.
//!
//! Every checkpoint becomes one file named after its key (`epoch_0003.csv`,
//! `final.csv`) with one row per walker and draw:
//!
//! ```text
//! walker,draw,lp__,H0,Om0
//! 0,0,-12.345678,71.203000,0.281000
//! ```
//!
//! When the checkpoint carries acceptance fractions, they are written next to
//! it as `<key>_acceptance.csv`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::storage::{Checkpoint, CheckpointKey, CheckpointSink};

/// Writes checkpoints as CSV files into a directory.
pub struct CsvCheckpoint {
    output_dir: PathBuf,
    precision: usize,
    written: Vec<PathBuf>,
}

impl CsvCheckpoint {
    /// Creates `output_dir` if needed.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;
        Ok(Self {
            output_dir,
            precision: 6,
            written: Vec::new(),
        })
    }

    /// Set the number of decimal places for floating point values.
    ///
    /// Default is 6 decimal places.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Paths of all files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn path_for(&self, key: CheckpointKey) -> PathBuf {
        self.output_dir.join(format!("{}.csv", key))
    }

    fn format_value(&self, value: f64) -> String {
        if value.is_nan() {
            "NA".to_string()
        } else if value.is_infinite() {
            if value > 0.0 { "Inf" } else { "-Inf" }.to_string()
        } else {
            format!("{:.prec$}", value, prec = self.precision)
        }
    }

    fn create(&mut self, path: PathBuf) -> Result<BufWriter<File>> {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create CSV file: {:?}", path))?;
        self.written.push(path);
        Ok(BufWriter::new(file))
    }

    fn write_chain(&mut self, key: CheckpointKey, checkpoint: &Checkpoint<'_>) -> Result<()> {
        let path = self.path_for(key);
        let mut writer = self.create(path)?;

        let mut header = vec!["walker".to_string(), "draw".to_string(), "lp__".to_string()];
        header.extend(checkpoint.param_names.iter().cloned());
        writeln!(writer, "{}", header.join(","))?;

        for (walker, (trace, log_probs)) in checkpoint
            .samples
            .outer_iter()
            .zip(checkpoint.log_probs.outer_iter())
            .enumerate()
        {
            for (draw, (position, &lp)) in trace.outer_iter().zip(log_probs.iter()).enumerate() {
                let mut row = vec![walker.to_string(), draw.to_string(), self.format_value(lp)];
                row.extend(position.iter().map(|&x| self.format_value(x)));
                writeln!(writer, "{}", row.join(","))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn write_acceptance(&mut self, key: CheckpointKey, checkpoint: &Checkpoint<'_>) -> Result<()> {
        let Some(acceptance) = checkpoint.acceptance else {
            return Ok(());
        };
        let path = self.output_dir.join(format!("{}_acceptance.csv", key));
        let mut writer = self.create(path)?;
        writeln!(writer, "walker,acceptance")?;
        for (walker, &fraction) in acceptance.iter().enumerate() {
            writeln!(writer, "{},{}", walker, self.format_value(fraction))?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl CheckpointSink for CsvCheckpoint {
    fn record(&mut self, key: CheckpointKey, checkpoint: Checkpoint<'_>) -> Result<()> {
        anyhow::ensure!(
            checkpoint.param_names.len() == checkpoint.dim(),
            "Expected {} parameter names, got {}",
            checkpoint.dim(),
            checkpoint.param_names.len()
        );
        self.write_chain(key, &checkpoint)
            .with_context(|| format!("Failed to write checkpoint {}", key))?;
        self.write_acceptance(key, &checkpoint)
            .with_context(|| format!("Failed to write acceptance of checkpoint {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Array3};
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn writes_one_row_per_draw() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut sink = CsvCheckpoint::new(temp_dir.path().join("chains"))?.with_precision(2);

        let samples = Array3::from_shape_fn((2, 3, 2), |(w, s, p)| (w * 100 + s * 10 + p) as f64);
        let log_probs = Array2::from_shape_fn((2, 3), |(w, s)| -1. - (w + s) as f64);
        let acceptance = array![0.5, f64::NAN];
        let names = vec!["H0".to_string(), "Om0".to_string()];
        let checkpoint = Checkpoint {
            samples: samples.view(),
            log_probs: log_probs.view(),
            acceptance: Some(acceptance.view()),
            param_names: &names,
        };
        sink.record(CheckpointKey::Epoch(3), checkpoint)?;
        sink.record(CheckpointKey::Final, checkpoint)?;

        let content = fs::read_to_string(temp_dir.path().join("chains/epoch_0003.csv"))?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1 + 2 * 3);
        assert_eq!(lines[0], "walker,draw,lp__,H0,Om0");
        assert_eq!(lines[1], "0,0,-1.00,0.00,1.00");
        assert_eq!(lines[6], "1,2,-4.00,120.00,121.00");

        let acceptance = fs::read_to_string(sink.output_dir().join("final_acceptance.csv"))?;
        assert_eq!(acceptance, "walker,acceptance\n0,0.50\n1,NA\n");

        assert!(sink.path_for(CheckpointKey::Final).exists());
        assert_eq!(sink.written().len(), 4);
        Ok(())
    }

    #[test]
    fn rejects_missing_names() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut sink = CsvCheckpoint::new(temp_dir.path())?;
        let samples = Array3::<f64>::zeros((2, 1, 2));
        let log_probs = Array2::<f64>::zeros((2, 1));
        let result = sink.record(
            CheckpointKey::Final,
            Checkpoint {
                samples: samples.view(),
                log_probs: log_probs.view(),
                acceptance: None,
                param_names: &["x".to_string()],
            },
        );
        assert!(result.is_err());
        Ok(())
    }
}
