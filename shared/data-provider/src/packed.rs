//! Streaming block reader over an ordered list of chunk files.
//!
//! Memory is bounded by the sliding window: `window_chunks` whole chunk
//! files are resident at a time, never the corpus. Shuffling, when enabled,
//! permutes rows inside the window only — there is no full-corpus shuffle,
//! and the window boundary is observable downstream.

use std::fs::File;
use std::path::PathBuf;

use memmap2::Mmap;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};
use weft_core::{Shuffle, TokenSize};

use crate::chunk::{ChunkHeader, CHUNK_HEADER_SIZE};
use crate::error::{DataError, Result};

/// One fixed-length run of token ids, widened to `i32` for consumers
/// regardless of the on-disk width.
pub type TokenBlock = Vec<i32>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedReaderConfig {
    /// Tokens per yielded block.
    pub block_size: usize,
    /// Whole chunk files resident per shuffle window.
    pub window_chunks: usize,
    pub shuffle: Shuffle,
    /// This worker's rank and the total worker count. Rows — not files — are
    /// partitioned: window-local row indices are handed out round-robin, so
    /// the union of one pass across all ranks is the full stream exactly
    /// once.
    pub rank: usize,
    pub world_size: usize,
}

impl Default for PackedReaderConfig {
    fn default() -> Self {
        Self {
            block_size: 2049,
            window_chunks: 8,
            shuffle: Shuffle::DontShuffle,
            rank: 0,
            world_size: 1,
        }
    }
}

/// Lazy, single-pass sequence of fixed-length token blocks over an ordered
/// chunk-file list. Exhaustion ends the pass; any looping is the caller's
/// policy.
pub struct PackedReader {
    filenames: Vec<PathBuf>,
    config: PackedReaderConfig,
    /// Per-rank window rng, seeded `base_seed + rank`, consumed window by
    /// window.
    rng: Option<ChaCha8Rng>,
    next_file: usize,
    window: Vec<TokenBlock>,
    window_pos: usize,
    failed: bool,
}

impl PackedReader {
    pub fn new(filenames: Vec<PathBuf>, config: PackedReaderConfig) -> Result<Self> {
        if config.block_size == 0 {
            return Err(DataError::Config("block_size must be non-zero".into()));
        }
        if config.window_chunks == 0 {
            return Err(DataError::Config("window_chunks must be non-zero".into()));
        }
        if config.world_size == 0 {
            return Err(DataError::Config("world_size must be at least 1".into()));
        }
        if config.rank >= config.world_size {
            return Err(DataError::Config(format!(
                "rank {} is out of range for world size {}",
                config.rank, config.world_size
            )));
        }

        let mut filenames = filenames;
        // Global permutation with the base seed: every rank derives the same
        // file order, so partitioning below stays consistent across workers.
        if let Some(mut rng) = config.shuffle.base_rng() {
            filenames.shuffle(&mut rng);
        }
        let rng = config.shuffle.rng_for_rank(config.rank);

        Ok(Self {
            filenames,
            config,
            rng,
            next_file: 0,
            window: Vec::new(),
            window_pos: 0,
            failed: false,
        })
    }

    pub fn num_files(&self) -> usize {
        self.filenames.len()
    }

    /// Load the next window of chunk files and collect this rank's rows.
    /// Returns false once the file list is exhausted.
    fn load_next_window(&mut self) -> Result<bool> {
        if self.next_file >= self.filenames.len() {
            return Ok(false);
        }
        let end = (self.next_file + self.config.window_chunks).min(self.filenames.len());
        let files = &self.filenames[self.next_file..end];

        let mut owned: Vec<TokenBlock> = Vec::new();
        let mut row_index = 0usize;
        for path in files {
            let file = File::open(path).map_err(|e| DataError::storage(e, path))?;
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| DataError::storage(e, path))?;
            let header = ChunkHeader::parse(path, &mmap)?;
            let n_blocks = header.capacity as usize / self.config.block_size;
            if n_blocks == 0 {
                warn!(
                    path = %path.display(),
                    capacity = header.capacity,
                    block_size = self.config.block_size,
                    "chunk holds less than one block; skipping"
                );
            }
            let width = usize::from(header.token_size);
            for block in 0..n_blocks {
                if row_index % self.config.world_size == self.config.rank {
                    let start = CHUNK_HEADER_SIZE + block * self.config.block_size * width;
                    owned.push(decode_block(
                        &mmap,
                        header.token_size,
                        start,
                        self.config.block_size,
                    ));
                }
                row_index += 1;
            }
        }

        if let Some(rng) = self.rng.as_mut() {
            owned.shuffle(rng);
        }
        debug!(
            files = files.len(),
            rows = row_index,
            owned = owned.len(),
            rank = self.config.rank,
            "loaded window"
        );
        self.next_file = end;
        self.window = owned;
        self.window_pos = 0;
        Ok(true)
    }
}

fn decode_block(data: &[u8], token_size: TokenSize, start: usize, len: usize) -> TokenBlock {
    let width = usize::from(token_size);
    data[start..start + len * width]
        .chunks(width)
        .map(|t| match token_size {
            TokenSize::TwoBytes => u16::from_le_bytes(t.try_into().unwrap()) as i32,
            TokenSize::FourBytes => u32::from_le_bytes(t.try_into().unwrap()) as i32,
        })
        .collect()
}

impl Iterator for PackedReader {
    type Item = Result<TokenBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        // a window may own zero rows on this rank; keep sliding
        while self.window_pos >= self.window.len() {
            match self.load_next_window() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let block = std::mem::take(&mut self.window[self.window_pos]);
        self.window_pos += 1;
        Some(Ok(block))
    }
}
