//! `train`: wire discovered corpora, the placement-policy merge and the
//! weighted stream into the iteration controller.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;
use weft_core::{LearningRateSchedule, Shuffle};
use weft_data_provider::{
    files_with_prefix, interleave_files, CombinedStream, InterleaveOptions, PackedReader,
    PackedReaderConfig, PlacementPolicy,
};
use weft_trainer::{
    BlockStream, ControllerConfig, DummyRuntime, IterationController, Resume, ValStreamFactory,
};

#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub prefix: String,
    pub weight: f64,
}

fn parse_source(s: &str) -> Result<SourceSpec, String> {
    let (prefix, weight) = s
        .split_once('=')
        .ok_or_else(|| format!("expected prefix=weight, got {s:?}"))?;
    let weight: f64 = weight
        .parse()
        .map_err(|e| format!("bad weight in {s:?}: {e}"))?;
    if !weight.is_finite() || weight < 0.0 {
        return Err(format!("weight must be finite and non-negative in {s:?}"));
    }
    Ok(SourceSpec {
        prefix: prefix.to_string(),
        weight,
    })
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory of packed primary-corpus chunks.
    #[clap(long, env)]
    pub train_data_dir: PathBuf,

    /// Weighted corpus prefixes inside the train data dir, as
    /// `prefix=weight`. Weights are normalized to sum to 1.
    #[clap(long = "source", default_value = "train_slim=1.0", value_parser = parse_source)]
    pub sources: Vec<SourceSpec>,

    /// Directory of packed validation chunks (prefix `validation`).
    #[clap(long, env)]
    pub val_data_dir: Option<PathBuf>,

    /// Directory of secondary-corpus chunks to mix into every source.
    #[clap(long, env)]
    pub secondary_data_dir: Option<PathBuf>,

    /// Filename prefix of secondary chunks.
    #[clap(long, default_value = "parallel")]
    pub secondary_prefix: String,

    /// Where the secondary corpus lands relative to the primary corpus.
    #[clap(long, value_enum, default_value_t = PlacementPolicy::Start, ignore_case = true)]
    pub placement: PlacementPolicy,

    /// Share of the interleavable primary corpus spread across the secondary
    /// corpus (interleave policies).
    #[clap(long, default_value_t = 1.0)]
    pub primary_fraction: f64,

    /// Replicate the secondary file list this many times before merging.
    #[clap(long, default_value_t = 1)]
    pub upsample: usize,

    /// Primary files excluded from the merge and re-attached verbatim.
    #[clap(long, default_value_t = 0, allow_hyphen_values = true)]
    pub offset: isize,

    /// Keep the last secondary file out of the merge and place it at the
    /// very end.
    #[clap(long, default_value_t = false)]
    pub force_last: bool,

    /// Tokens per training sequence; blocks carry one extra token for the
    /// shifted target.
    #[clap(long, default_value_t = 2048)]
    pub sequence_length: usize,

    /// Whole chunk files resident per shuffle window.
    #[clap(long, default_value_t = 8)]
    pub window_chunks: usize,

    /// Shuffle file order and blocks within the sliding window.
    #[clap(long, default_value_t = false)]
    pub shuffle: bool,

    #[clap(long, default_value_t = 3407)]
    pub seed: u64,

    /// This worker's rank.
    #[clap(long, env, default_value_t = 0)]
    pub rank: usize,

    /// Total worker count.
    #[clap(long, env, default_value_t = 1)]
    pub world_size: usize,

    /// Blocks consumed per iteration.
    #[clap(long, default_value_t = 16)]
    pub micro_batch_size: usize,

    /// Iterations accumulated per optimizer step.
    #[clap(long, default_value_t = 8)]
    pub accumulation_steps: u64,

    #[clap(long, default_value_t = 100_000)]
    pub max_iterations: u64,

    /// Warmup length in optimizer steps (scaled by accumulation into
    /// iterations).
    #[clap(long, default_value_t = 2000)]
    pub warmup_steps: u64,

    /// Iterations of cosine decay; defaults to max-iterations.
    #[clap(long)]
    pub decay_iters: Option<u64>,

    #[clap(long, default_value_t = 4e-4)]
    pub learning_rate: f64,

    #[clap(long, default_value_t = 4e-5)]
    pub min_lr: f64,

    /// Optimizer steps between validation/checkpoint points.
    #[clap(long, default_value_t = 5000)]
    pub eval_step_interval: u64,

    /// Validation batches per evaluation.
    #[clap(long, default_value_t = 100)]
    pub eval_iters: usize,

    #[clap(long, env, default_value = "out/weft")]
    pub out_dir: PathBuf,

    /// Resume from the newest checkpoint in the output directory.
    #[clap(long, default_value_t = false)]
    pub resume: bool,

    /// Resume from an explicit checkpoint path.
    #[clap(long, conflicts_with = "resume")]
    pub resume_from: Option<PathBuf>,

    /// Restore model state but restart the data stream from iteration 0.
    #[clap(long, default_value_t = false)]
    pub reset_dataloader: bool,
}

impl TrainArgs {
    fn shuffle_mode(&self) -> Shuffle {
        if self.shuffle {
            Shuffle::Seeded(self.seed)
        } else {
            Shuffle::DontShuffle
        }
    }
}

pub struct SourcePlan {
    pub prefix: String,
    pub weight: f64,
    pub files: Vec<PathBuf>,
}

pub struct DataPlan {
    pub sources: Vec<SourcePlan>,
}

/// Discover every source's files and merge the secondary corpus into each
/// per the placement policy.
pub fn build_plan(args: &TrainArgs) -> Result<DataPlan> {
    let secondary = match &args.secondary_data_dir {
        Some(dir) => {
            let files = files_with_prefix(dir, &args.secondary_prefix)?;
            if files.is_empty() {
                bail!(
                    "no secondary chunks with prefix {:?} in {dir:?}",
                    args.secondary_prefix
                );
            }
            Some(files)
        }
        None => None,
    };

    let total_weight: f64 = args.sources.iter().map(|s| s.weight).sum();
    if total_weight <= 0.0 {
        bail!("source weights must sum to a positive value");
    }

    let mut sources = Vec::with_capacity(args.sources.len());
    for spec in &args.sources {
        let mut files = files_with_prefix(&args.train_data_dir, &spec.prefix)?;
        if files.is_empty() {
            bail!(
                "no chunks with prefix {:?} in {:?}",
                spec.prefix,
                args.train_data_dir
            );
        }
        if let Some(secondary) = &secondary {
            let mut options = InterleaveOptions {
                policy: args.placement,
                ratio: 0.0,
                upsample: args.upsample,
                offset: args.offset,
                force_last: args.force_last,
            };
            options.ratio =
                options.ratio_from_fraction(args.primary_fraction, files.len(), secondary.len());
            info!(
                prefix = spec.prefix.as_str(),
                primary = files.len(),
                secondary = secondary.len(),
                policy = ?args.placement,
                ratio = options.ratio,
                "merging corpora"
            );
            files = interleave_files(&files, secondary, &options)?;
        }
        sources.push(SourcePlan {
            prefix: spec.prefix.clone(),
            weight: spec.weight / total_weight,
            files,
        });
    }
    Ok(DataPlan { sources })
}

pub fn run(args: TrainArgs) -> Result<()> {
    info!(?args, "starting training run");
    let plan = build_plan(&args)?;

    let reader_config = PackedReaderConfig {
        block_size: args.sequence_length + 1,
        window_chunks: args.window_chunks,
        shuffle: args.shuffle_mode(),
        rank: args.rank,
        world_size: args.world_size,
    };

    let mut readers = Vec::with_capacity(plan.sources.len());
    let mut weights = Vec::with_capacity(plan.sources.len());
    for source in &plan.sources {
        info!(
            prefix = source.prefix.as_str(),
            files = source.files.len(),
            weight = source.weight,
            "opening source"
        );
        readers.push(PackedReader::new(
            source.files.clone(),
            reader_config.clone(),
        )?);
        weights.push(source.weight);
    }
    let mut stream = CombinedStream::new(readers, &weights, args.seed)?;

    let warmup_iters = args.warmup_steps * args.accumulation_steps;
    let decay_iters = args.decay_iters.unwrap_or(args.max_iterations);
    let controller_config = ControllerConfig {
        max_iterations: args.max_iterations,
        accumulation_steps: args.accumulation_steps,
        schedule: LearningRateSchedule {
            peak_lr: args.learning_rate,
            min_lr: args.min_lr,
            warmup_iters,
            decay_iters,
        },
        eval_interval: args.eval_step_interval,
        eval_iters: args.eval_iters,
        micro_batch_size: args.micro_batch_size,
        block_size: args.sequence_length + 1,
        world_size: args.world_size,
        out_dir: args.out_dir.clone(),
    };

    let mut controller =
        IterationController::new(controller_config, DummyRuntime::for_rank(args.rank))?;
    let resume = if let Some(path) = &args.resume_from {
        Resume::Path(path.clone())
    } else if args.resume {
        Resume::Latest
    } else {
        Resume::Fresh
    };
    let phase = controller.prepare(&resume, args.reset_dataloader)?;

    let val_factory: Option<ValStreamFactory<'_>> = match &args.val_data_dir {
        Some(dir) => {
            let files = files_with_prefix(dir, "validation")?;
            if files.is_empty() {
                bail!("no validation chunks with prefix \"validation\" in {dir:?}");
            }
            info!(files = files.len(), "found validation corpus");
            let val_config = PackedReaderConfig {
                shuffle: Shuffle::DontShuffle,
                ..reader_config.clone()
            };
            Some(Box::new(move || {
                let reader = PackedReader::new(files.clone(), val_config.clone())?;
                Ok(Box::new(reader) as BlockStream<'_>)
            }))
        }
        None => None,
    };

    let report = controller
        .run(&mut stream, val_factory, phase)
        .context("training loop failed")?;

    info!(
        iterations = report.iterations,
        optimizer_steps = report.optimizer_steps,
        checkpoints = report.checkpoints,
        final_train_loss = report.final_train_loss,
        final_val_loss = report.final_val_loss,
        "training finished"
    );
    Ok(())
}
