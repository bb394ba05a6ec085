use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_data_provider::TokenBlock;

/// Counters carried across the whole run.
///
/// The iteration counter is monotonically non-decreasing within a run and is
/// the sole source of truth for learning-rate and cadence decisions; it is
/// persisted in every checkpoint and fully determines resumption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    pub iteration: u64,
    pub step: u64,
}

/// The seam to the external model/optimizer/process-group runtime.
///
/// `train` runs forward/backward over one micro-batch; when `is_accumulating`
/// is false the runtime must also clip, step and zero its optimizer.
/// `barrier` blocks until every worker reaches the same point (a no-op for a
/// single process). Only the designated writer creates checkpoint files —
/// the output directory is shared across workers and filename races are not
/// tolerated.
pub trait TrainingRuntime {
    fn train(&mut self, batch: &[TokenBlock], lr: f64, is_accumulating: bool) -> Result<f32>;

    fn validate(&mut self, batch: &[TokenBlock]) -> Result<f32>;

    fn save_checkpoint(&mut self, path: &Path, state: &TrainingState) -> Result<()>;

    fn load_checkpoint(&mut self, path: &Path) -> Result<TrainingState>;

    fn barrier(&self);

    fn is_writer(&self) -> bool;
}

/// Stand-in runtime with deterministic fake losses and JSON state blobs.
/// Backs the controller tests and the binary's dry-run mode; a real model
/// runtime replaces it through the same trait.
#[derive(Debug, Default)]
pub struct DummyRuntime {
    rank: usize,
    /// `(lr, is_accumulating)` per train call, in order.
    pub train_calls: Vec<(f64, bool)>,
    /// First token of every consumed block, in consumption order.
    pub consumed: Vec<i32>,
    pub validate_calls: usize,
}

impl DummyRuntime {
    pub fn for_rank(rank: usize) -> Self {
        Self {
            rank,
            ..Default::default()
        }
    }
}

impl TrainingRuntime for DummyRuntime {
    fn train(&mut self, batch: &[TokenBlock], lr: f64, is_accumulating: bool) -> Result<f32> {
        self.consumed
            .extend(batch.iter().map(|b| b.first().copied().unwrap_or(-1)));
        self.train_calls.push((lr, is_accumulating));
        // a slowly decaying pseudo-loss keeps dry-run logs readable
        Ok(10.0 / (1.0 + (self.train_calls.len() as f32).ln()))
    }

    fn validate(&mut self, batch: &[TokenBlock]) -> Result<f32> {
        self.validate_calls += 1;
        Ok(10.0 / (1.0 + (batch.len() as f32)))
    }

    fn save_checkpoint(&mut self, path: &Path, state: &TrainingState) -> Result<()> {
        let blob = serde_json::to_vec_pretty(state)?;
        std::fs::write(path, blob).with_context(|| format!("writing checkpoint {path:?}"))?;
        debug!(path = %path.display(), "wrote dummy checkpoint");
        Ok(())
    }

    fn load_checkpoint(&mut self, path: &Path) -> Result<TrainingState> {
        let blob =
            std::fs::read(path).with_context(|| format!("reading checkpoint {path:?}"))?;
        Ok(serde_json::from_slice(&blob)?)
    }

    fn barrier(&self) {}

    fn is_writer(&self) -> bool {
        self.rank == 0
    }
}
