//! The iteration controller: a state machine over `{iteration, step}` that
//! drives learning-rate application, gradient-accumulation boundaries,
//! validation/checkpoint cadence and exact resumption.
//!
//! Resumption is an explicit `FastForward` phase: the freshly re-seeded
//! stream is consumed and discarded until the data cursor matches the
//! restored iteration counter, then all workers synchronize before any of
//! them trains. Nothing about the model is touched during fast-forward;
//! the learning rate needs no replay because it is a pure function of the
//! counter.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use weft_core::LearningRateSchedule;
use weft_data_provider::TokenBlock;

use crate::checkpoint::{checkpoint_name, find_latest_checkpoint};
use crate::error::TrainerError;
use crate::runtime::{TrainingRuntime, TrainingState};

/// A boxed block stream, the shape both the training and validation inputs
/// arrive in.
pub type BlockStream<'a> = Box<dyn Iterator<Item = weft_data_provider::Result<TokenBlock>> + 'a>;

/// Builds a fresh validation stream for each evaluation point.
pub type ValStreamFactory<'a> = Box<dyn FnMut() -> Result<BlockStream<'a>, TrainerError> + 'a>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub max_iterations: u64,
    /// Micro-batches accumulated per optimizer step.
    pub accumulation_steps: u64,
    pub schedule: LearningRateSchedule,
    /// Optimizer steps between validation/checkpoint points.
    pub eval_interval: u64,
    /// Validation batches consumed per evaluation.
    pub eval_iters: usize,
    /// Blocks pulled from the stream per iteration.
    pub micro_batch_size: usize,
    pub block_size: usize,
    pub world_size: usize,
    pub out_dir: PathBuf,
}

impl ControllerConfig {
    fn validate(&self) -> Result<(), TrainerError> {
        if self.accumulation_steps == 0 {
            return Err(TrainerError::Config(
                "accumulation_steps must be at least 1".into(),
            ));
        }
        if self.eval_interval == 0 {
            return Err(TrainerError::Config("eval_interval must be at least 1".into()));
        }
        if self.micro_batch_size == 0 {
            return Err(TrainerError::Config(
                "micro_batch_size must be at least 1".into(),
            ));
        }
        if self.world_size == 0 {
            return Err(TrainerError::Config("world_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Tokens the whole run has consumed once iteration `iteration` is done.
    pub fn total_tokens(&self, iteration: u64) -> u64 {
        self.block_size as u64
            * (iteration + 1)
            * self.micro_batch_size as u64
            * self.world_size as u64
    }
}

/// Where to restart from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Resume {
    #[default]
    Fresh,
    /// Newest checkpoint under the output directory.
    Latest,
    /// An explicit checkpoint path.
    Path(PathBuf),
}

/// Controller phases. `FastForward` moves the data cursor to a restored
/// iteration count by discarding batches; model state is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FastForward { target: u64 },
    Train,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunReport {
    pub iterations: u64,
    pub optimizer_steps: u64,
    pub checkpoints: u64,
    pub final_train_loss: Option<f32>,
    pub final_val_loss: Option<f32>,
}

pub struct IterationController<R: TrainingRuntime> {
    config: ControllerConfig,
    runtime: R,
    state: TrainingState,
}

impl<R: TrainingRuntime> IterationController<R> {
    pub fn new(config: ControllerConfig, runtime: R) -> Result<Self, TrainerError> {
        config.validate()?;
        if runtime.is_writer() {
            std::fs::create_dir_all(&config.out_dir).map_err(|e| TrainerError::Io {
                source: e,
                path: config.out_dir.clone(),
            })?;
        }
        Ok(Self {
            config,
            runtime,
            state: TrainingState::default(),
        })
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    /// Restore state per `resume` and decide the starting phase.
    ///
    /// `reset_dataloader` keeps the restored model/optimizer state but
    /// overrides the iteration counter back to 0, restarting the stream.
    pub fn prepare(
        &mut self,
        resume: &Resume,
        reset_dataloader: bool,
    ) -> Result<Phase, TrainerError> {
        let path = match resume {
            Resume::Fresh => None,
            Resume::Latest => Some(
                find_latest_checkpoint(&self.config.out_dir)?
                    .ok_or_else(|| TrainerError::NothingToResume(self.config.out_dir.clone()))?,
            ),
            Resume::Path(path) => Some(path.clone()),
        };
        if let Some(path) = path {
            info!(path = %path.display(), "resuming from checkpoint");
            self.state = self
                .runtime
                .load_checkpoint(&path)
                .map_err(TrainerError::Runtime)?;
            info!(
                iteration = self.state.iteration,
                step = self.state.step,
                "restored training state"
            );
            if reset_dataloader {
                info!("data stream and iteration counter reset to the start");
                self.state.iteration = 0;
            }
        }
        Ok(if self.state.iteration > 0 {
            Phase::FastForward {
                target: self.state.iteration,
            }
        } else {
            Phase::Train
        })
    }

    /// Drive the loop over `stream` until `max_iterations` or exhaustion.
    pub fn run<S>(
        &mut self,
        stream: &mut S,
        mut make_val_stream: Option<ValStreamFactory<'_>>,
        phase: Phase,
    ) -> Result<RunReport, TrainerError>
    where
        S: Iterator<Item = weft_data_provider::Result<TokenBlock>>,
    {
        if let Phase::FastForward { target } = phase {
            self.fast_forward(stream, target)?;
        }

        let mut report = RunReport::default();
        loop {
            if self.state.iteration >= self.config.max_iterations {
                info!(iteration = self.state.iteration, "reached max iterations");
                break;
            }
            let Some(batch) = self.next_batch(stream)? else {
                info!(
                    iteration = self.state.iteration,
                    "training stream exhausted, ending pass"
                );
                break;
            };

            let lr = self.config.schedule.lr(self.state.iteration);
            let is_accumulating =
                (self.state.iteration + 1) % self.config.accumulation_steps != 0;
            let loss = self
                .runtime
                .train(&batch, lr, is_accumulating)
                .map_err(TrainerError::Runtime)?;

            if !is_accumulating {
                self.state.step += 1;
                report.optimizer_steps += 1;
            }
            self.state.iteration += 1;
            report.iterations += 1;
            report.final_train_loss = Some(loss);
            debug!(
                iteration = self.state.iteration,
                step = self.state.step,
                lr,
                loss,
                optimizer_step = !is_accumulating,
                "iteration finished"
            );

            // cadence is evaluated only on optimizer-step boundaries
            if !is_accumulating && self.state.step % self.config.eval_interval == 0 {
                if let Some(make_val) = make_val_stream.as_mut() {
                    let mut val_stream = make_val()?;
                    report.final_val_loss = self.validate(&mut val_stream)?;
                    self.runtime.barrier();
                }
                self.write_checkpoint()?;
                report.checkpoints += 1;
            }
        }
        Ok(report)
    }

    /// Consume and discard batches until the data cursor reaches `target`,
    /// then hold at the barrier until every worker is caught up.
    fn fast_forward<S>(&mut self, stream: &mut S, target: u64) -> Result<(), TrainerError>
    where
        S: Iterator<Item = weft_data_provider::Result<TokenBlock>>,
    {
        let started = Instant::now();
        info!(target_iteration = target, "fast-forwarding data stream");
        for skipped in 0..target {
            if self.next_batch(stream)?.is_none() {
                return Err(TrainerError::FastForwardExhausted { skipped, target });
            }
        }
        self.runtime.barrier();
        info!(target_iteration = target, elapsed = ?started.elapsed(), "fast-forward finished");
        Ok(())
    }

    /// Pull one micro-batch off the stream. A trailing group smaller than
    /// `micro_batch_size` ends the pass.
    fn next_batch<S>(&mut self, stream: &mut S) -> Result<Option<Vec<TokenBlock>>, TrainerError>
    where
        S: Iterator<Item = weft_data_provider::Result<TokenBlock>>,
    {
        let mut batch = Vec::with_capacity(self.config.micro_batch_size);
        for _ in 0..self.config.micro_batch_size {
            match stream.next() {
                Some(block) => batch.push(block?),
                None => {
                    if !batch.is_empty() {
                        debug!(dropped = batch.len(), "dropping trailing partial batch");
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(batch))
    }

    fn validate(&mut self, val_stream: &mut BlockStream<'_>) -> Result<Option<f32>, TrainerError> {
        info!(step = self.state.step, "validating");
        let started = Instant::now();
        let mut losses = Vec::with_capacity(self.config.eval_iters);
        for _ in 0..self.config.eval_iters {
            let Some(batch) = self.next_batch(val_stream)? else {
                break;
            };
            losses.push(
                self.runtime
                    .validate(&batch)
                    .map_err(TrainerError::Runtime)?,
            );
        }
        if losses.is_empty() {
            warn!("validation stream yielded no batches");
            return Ok(None);
        }
        let mean = losses.iter().sum::<f32>() / losses.len() as f32;
        info!(
            step = self.state.step,
            val_loss = mean,
            elapsed = ?started.elapsed(),
            "validation finished"
        );
        Ok(Some(mean))
    }

    fn write_checkpoint(&mut self) -> Result<PathBuf, TrainerError> {
        let total_tokens = self.config.total_tokens(self.state.iteration);
        let path = self
            .config
            .out_dir
            .join(checkpoint_name(self.state.iteration, total_tokens));
        if self.runtime.is_writer() {
            info!(path = %path.display(), "saving checkpoint");
            self.runtime
                .save_checkpoint(&path, &self.state)
                .map_err(TrainerError::Runtime)?;
        }
        Ok(path)
    }
}
