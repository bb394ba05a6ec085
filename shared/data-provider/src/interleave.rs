//! Placement-policy merge of a secondary corpus into a primary file order.
//!
//! The interesting policies are the cumulative-rounding interleaves: after
//! the k-th secondary file, the cumulative number of primary files emitted
//! must be `round(ratio * k)`. The target is recomputed from the running
//! total at every step — an incremental accumulator would let rounding error
//! drift across a long file list.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DataError, Result};

/// How secondary-corpus files are positioned relative to the primary corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicy {
    /// All secondary files before the primary corpus.
    Start,
    /// All secondary files after the primary corpus.
    End,
    /// Cumulative-rounding merge, walking both lists front to back.
    Interleave,
    /// The same merge walked from the tails of both lists.
    InterleaveReversed,
    /// The secondary list alone; for corpora that were pre-mixed externally.
    RepeatInsert,
}

impl PlacementPolicy {
    /// Parse an operator-supplied policy name (`start`, `end`, `interleave`,
    /// `interleave-reversed`, `repeat-insert`).
    pub fn parse(name: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(name, true)
            .map_err(|_| DataError::Config(format!("unrecognized placement policy {name:?}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterleaveOptions {
    pub policy: PlacementPolicy,
    /// Primary files to emit per secondary file consumed (interleave modes).
    pub ratio: f64,
    /// Replicate the whole secondary list this many times before merging.
    pub upsample: usize,
    /// Primary files excluded from the merge and re-attached verbatim: a
    /// prefix (`offset > 0`, `Interleave`) emitted before the merged region,
    /// or a suffix (`offset < 0`, `InterleaveReversed`) emitted after it.
    pub offset: isize,
    /// Hold the final secondary file out of the merge and place it at the
    /// very end.
    pub force_last: bool,
}

impl Default for InterleaveOptions {
    fn default() -> Self {
        Self {
            policy: PlacementPolicy::Interleave,
            ratio: 1.0,
            upsample: 1,
            offset: 0,
            force_last: false,
        }
    }
}

impl InterleaveOptions {
    /// Derive the per-secondary-file ratio from an operator-facing primary
    /// fraction: the share of the interleavable primary corpus spread evenly
    /// across the merged secondary files.
    pub fn ratio_from_fraction(
        &self,
        fraction: f64,
        primary_len: usize,
        secondary_len: usize,
    ) -> f64 {
        let merged_secondary =
            (secondary_len * self.upsample).saturating_sub(self.force_last as usize);
        let interleavable = primary_len.saturating_sub(self.offset.unsigned_abs());
        if merged_secondary == 0 {
            return 0.0;
        }
        fraction * interleavable as f64 / merged_secondary as f64
    }
}

/// Merge `secondary` into the `primary` file order under `options`.
///
/// Pure: the same inputs always produce the same output. The output is a
/// permutation of the inputs — secondary files may repeat via `upsample`,
/// primary files are never duplicated or dropped.
pub fn interleave_files(
    primary: &[PathBuf],
    secondary: &[PathBuf],
    options: &InterleaveOptions,
) -> Result<Vec<PathBuf>> {
    if secondary.is_empty() {
        return Err(DataError::Config(format!(
            "placement policy {:?} requires a non-empty secondary corpus",
            options.policy
        )));
    }
    if options.upsample == 0 {
        return Err(DataError::Config("upsample must be at least 1".into()));
    }
    if !options.ratio.is_finite() || options.ratio < 0.0 {
        return Err(DataError::Config(format!(
            "interleave ratio must be finite and non-negative, got {}",
            options.ratio
        )));
    }

    let mut upsampled = Vec::with_capacity(secondary.len() * options.upsample);
    for _ in 0..options.upsample {
        upsampled.extend_from_slice(secondary);
    }

    let merged = match options.policy {
        PlacementPolicy::Start => {
            let mut out = upsampled;
            out.extend_from_slice(primary);
            out
        }
        PlacementPolicy::End => {
            let mut out = primary.to_vec();
            out.append(&mut upsampled);
            out
        }
        PlacementPolicy::Interleave => interleave_forward(primary, upsampled, options)?,
        PlacementPolicy::InterleaveReversed => interleave_reversed(primary, upsampled, options)?,
        PlacementPolicy::RepeatInsert => upsampled,
    };
    debug!(
        policy = ?options.policy,
        primary = primary.len(),
        secondary = secondary.len(),
        merged = merged.len(),
        "interleaved corpora"
    );
    Ok(merged)
}

/// Split off the held-out last secondary file when `force_last` is set.
fn split_forced_last(
    mut secondary: Vec<PathBuf>,
    force_last: bool,
) -> (Vec<PathBuf>, Option<PathBuf>) {
    if force_last {
        let last = secondary.pop();
        (secondary, last)
    } else {
        (secondary, None)
    }
}

fn interleave_forward(
    primary: &[PathBuf],
    upsampled: Vec<PathBuf>,
    options: &InterleaveOptions,
) -> Result<Vec<PathBuf>> {
    if options.offset < 0 {
        return Err(DataError::Config(format!(
            "the interleave policy excludes a prefix; offset must be non-negative, got {}",
            options.offset
        )));
    }
    let offset = options.offset as usize;
    if offset > primary.len() {
        return Err(DataError::Config(format!(
            "offset {offset} exceeds the primary corpus of {} files",
            primary.len()
        )));
    }
    let (head, rest) = primary.split_at(offset);
    let (merge_secondary, held_last) = split_forced_last(upsampled, options.force_last);

    let mut out: Vec<PathBuf> = head.to_vec();
    let mut remaining = rest;
    let mut emitted = 0usize;
    for (idx, sec) in merge_secondary.iter().enumerate() {
        out.push(sec.clone());
        let target = (options.ratio * (idx + 1) as f64).round() as usize;
        let take = target.saturating_sub(emitted).min(remaining.len());
        out.extend_from_slice(&remaining[..take]);
        remaining = &remaining[take..];
        emitted += take;
    }
    out.extend_from_slice(remaining);
    if let Some(last) = held_last {
        out.push(last);
    }
    Ok(out)
}

fn interleave_reversed(
    primary: &[PathBuf],
    upsampled: Vec<PathBuf>,
    options: &InterleaveOptions,
) -> Result<Vec<PathBuf>> {
    if options.offset > 0 {
        return Err(DataError::NotImplemented(format!(
            "a positive offset is not implemented for the interleave-reversed policy, got {}",
            options.offset
        )));
    }
    if options.force_last && options.offset != 0 {
        // this combination has no defined ordering; refuse rather than guess
        return Err(DataError::Config(
            "force_last combined with a nonzero offset is not supported for interleave-reversed"
                .into(),
        ));
    }
    let offset = options.offset.unsigned_abs();
    if offset > primary.len() {
        return Err(DataError::Config(format!(
            "offset {offset} exceeds the primary corpus of {} files",
            primary.len()
        )));
    }
    let (rest, tail) = primary.split_at(primary.len() - offset);
    let (merge_secondary, held_last) = split_forced_last(upsampled, options.force_last);

    let mut remaining = rest.to_vec();
    let mut assembled: Vec<PathBuf> = Vec::new();
    let mut emitted = 0usize;
    for (idx, sec) in merge_secondary.iter().rev().enumerate() {
        assembled.push(sec.clone());
        let target = (options.ratio * (idx + 1) as f64).round() as usize;
        let take = target.saturating_sub(emitted).min(remaining.len());
        if take > 0 {
            // drawn from the tail of the remaining list, nearest file first
            let drawn = remaining.split_off(remaining.len() - take);
            assembled.extend(drawn.into_iter().rev());
            emitted += take;
        }
    }
    assembled.reverse();
    let mut out = remaining;
    out.append(&mut assembled);
    out.extend_from_slice(tail);
    if let Some(last) = held_last {
        out.push(last);
    }
    Ok(out)
}
