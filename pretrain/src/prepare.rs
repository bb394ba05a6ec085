//! `prepare`: convert jsonl records of per-language text into packed chunks.
//!
//! Each input line is a JSON object mapping language ids to text. Sources
//! are drained round-robin in fixed runs so languages stay mixed, and the
//! rendered language order flips after every full cycle when `--swap` is on.
//! Records accumulate into large batches before tokenization so the
//! per-writer truncation waste stays bounded.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tokenizers::Tokenizer;
use tracing::{debug, info};
use weft_core::{deterministic_shuffle, TokenSize};
use weft_data_provider::ChunkWriter;

/// Records drained from one source file per round-robin turn.
const RUN_LENGTH: usize = 1000;
/// Records per writer batch.
const BATCH_SIZE: usize = 100_000;

type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Args, Debug)]
pub struct PrepareArgs {
    /// jsonl files of per-language records, one JSON object per line
    /// ({"en": "...", "fr": "..."}).
    #[clap(long, required = true, num_args = 1..)]
    pub source_paths: Vec<PathBuf>,

    /// tokenizer.json consumed as a black box (ids + vocabulary size only).
    #[clap(long, env)]
    pub tokenizer_path: PathBuf,

    #[clap(long, env, default_value = "data/parallel")]
    pub destination_path: PathBuf,

    /// Elements per chunk file.
    #[clap(long, default_value_t = 2049 * 8)]
    pub chunk_size: usize,

    /// Filename prefix for the produced chunks.
    #[clap(long, default_value = "parallel")]
    pub out_filename: String,

    /// Separator token id prepended to every record.
    #[clap(long, default_value_t = 1)]
    pub sep_token: u32,

    /// Shuffle records before writing; the permutation is saved next to the
    /// output. Mutually exclusive with --indices.
    #[clap(long, default_value_t = false)]
    pub shuffle: bool,

    /// JSON file holding an externally supplied row permutation, replacing
    /// the internal shuffle.
    #[clap(long)]
    pub indices: Option<PathBuf>,

    /// Flip the rendered language order after each full pass over the
    /// sources.
    #[clap(long, default_value_t = true)]
    pub swap: bool,

    /// Start the first pass with the reversed language order.
    #[clap(long, default_value_t = false)]
    pub first_swap: bool,

    /// Force a token width (2 or 4) instead of deriving it from the
    /// vocabulary size.
    #[clap(long)]
    pub token_bytes: Option<u8>,
}

pub fn run(args: PrepareArgs) -> Result<()> {
    if args.shuffle && args.indices.is_some() {
        bail!("--shuffle and --indices cannot be used together");
    }
    let tokenizer = Tokenizer::from_file(&args.tokenizer_path)
        .map_err(|e| anyhow!("failed to load tokenizer {:?}: {e}", args.tokenizer_path))?;
    let vocab_size = tokenizer.get_vocab_size(true);
    let token_size = match args.token_bytes {
        None => TokenSize::for_vocab_size(vocab_size),
        Some(2) => TokenSize::TwoBytes,
        Some(4) => TokenSize::FourBytes,
        Some(other) => bail!("unsupported token width {other}, expected 2 or 4"),
    };
    info!(vocab_size, ?token_size, "loaded tokenizer");

    std::fs::create_dir_all(&args.destination_path)
        .with_context(|| format!("creating {:?}", args.destination_path))?;

    let mut sources = load_sources(&args.source_paths)?;
    apply_permutation(&args, &mut sources)?;

    let mut writer = BatchedWriter {
        args: &args,
        tokenizer: &tokenizer,
        token_size,
        writer_index: 0,
        total_tokens: 0,
        total_discarded: 0,
        total_chunks: 0,
    };

    let mut cursors = vec![0usize; sources.len()];
    let mut swap_order = args.first_swap;
    let mut batch: Vec<String> = Vec::new();
    let mut finished = false;
    while !finished {
        for (i, (name, records)) in sources.iter().enumerate() {
            let start = cursors[i];
            let end = (start + RUN_LENGTH).min(records.len());
            if start < end {
                debug!(
                    source = name.as_str(),
                    start,
                    end,
                    swapped = swap_order,
                    "queueing records"
                );
                batch.extend(records[start..end].iter().map(|r| render_record(r, swap_order)));
                cursors[i] = end;
            }
            if batch.len() >= BATCH_SIZE {
                writer.flush(&mut batch)?;
            }
        }
        finished = cursors
            .iter()
            .zip(&sources)
            .all(|(cursor, (_, records))| *cursor >= records.len());
        if args.swap {
            swap_order = !swap_order;
        }
    }
    if !batch.is_empty() {
        writer.flush(&mut batch)?;
    }

    info!(
        total_tokens = writer.total_tokens,
        discarded_tokens = writer.total_discarded,
        chunks = writer.total_chunks,
        "prepare finished"
    );
    Ok(())
}

fn load_sources(paths: &[PathBuf]) -> Result<Vec<(String, Vec<Record>)>> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        info!(path = %path.display(), "loading records");
        let file = File::open(path).with_context(|| format!("couldn't open source {path:?}"))?;
        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("couldn't read {path:?}"))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line)
                .with_context(|| format!("bad record at {:?}:{}", path, line_no + 1))?;
            records.push(record);
        }
        if records.is_empty() {
            bail!("no records in {path:?}");
        }
        info!(path = %path.display(), records = records.len(), "loaded source");
        sources.push((path.display().to_string(), records));
    }
    Ok(sources)
}

/// Reorder every source's rows: by the externally supplied permutation, or
/// by a seeded shuffle whose permutation is saved for reuse.
fn apply_permutation(args: &PrepareArgs, sources: &mut [(String, Vec<Record>)]) -> Result<()> {
    if let Some(indices_path) = &args.indices {
        let blob = std::fs::read(indices_path)
            .with_context(|| format!("couldn't read indices file {indices_path:?}"))?;
        let indices: Vec<usize> = serde_json::from_slice(&blob)
            .with_context(|| format!("bad indices file {indices_path:?}"))?;
        for (name, records) in sources.iter_mut() {
            if indices.len() != records.len() {
                bail!(
                    "indices file has {} entries but source {} has {} records",
                    indices.len(),
                    name,
                    records.len()
                );
            }
            *records = reorder(records, &indices)?;
        }
    } else if args.shuffle {
        for (i, (name, records)) in sources.iter_mut().enumerate() {
            let mut indices: Vec<usize> = (0..records.len()).collect();
            deterministic_shuffle(&mut indices, 0);
            let idx_path = args
                .destination_path
                .join(format!("{}_idx_{}.json", args.out_filename, i));
            std::fs::write(&idx_path, serde_json::to_vec(&indices)?)
                .with_context(|| format!("couldn't save permutation {idx_path:?}"))?;
            info!(source = name.as_str(), path = %idx_path.display(), "saved shuffle permutation");
            *records = reorder(records, &indices)?;
        }
    }
    Ok(())
}

fn reorder(records: &[Record], indices: &[usize]) -> Result<Vec<Record>> {
    indices
        .iter()
        .map(|&i| {
            records
                .get(i)
                .cloned()
                .ok_or_else(|| anyhow!("index {i} is out of range for {} records", records.len()))
        })
        .collect()
}

/// Render one record: language-tagged lines in sorted (optionally reversed)
/// language order.
fn render_record(record: &Record, reverse: bool) -> String {
    let mut langs: Vec<&String> = record.keys().collect();
    langs.sort();
    if reverse {
        langs.reverse();
    }
    langs
        .iter()
        .map(|lang| format!("{}: {}", lang, record[*lang].as_str().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n")
}

struct BatchedWriter<'a> {
    args: &'a PrepareArgs,
    tokenizer: &'a Tokenizer,
    token_size: TokenSize,
    writer_index: usize,
    total_tokens: u64,
    total_discarded: u64,
    total_chunks: usize,
}

impl BatchedWriter<'_> {
    /// Tokenize one batch in parallel and stream it through a fresh chunk
    /// writer. Each batch gets its own zero-padded prefix so chunk names stay
    /// unique and lexicographically ordered.
    fn flush(&mut self, batch: &mut Vec<String>) -> Result<()> {
        let prefix = format!("{}_{:04}", self.args.out_filename, self.writer_index);
        info!(
            prefix = prefix.as_str(),
            records = batch.len(),
            "tokenizing and writing batch"
        );
        let tokenizer = self.tokenizer;
        let encoded: Vec<Vec<u32>> = batch
            .par_iter()
            .map(|text| {
                tokenizer
                    .encode(text.as_str(), false)
                    .map(|e| e.get_ids().to_vec())
                    .map_err(|e| anyhow!("tokenization failed: {e}"))
            })
            .collect::<Result<_>>()?;

        let mut writer = ChunkWriter::new(
            &self.args.destination_path,
            &prefix,
            self.args.chunk_size,
            self.token_size,
        )?;
        let mut tokens = Vec::new();
        for ids in &encoded {
            tokens.clear();
            tokens.reserve(ids.len() + 1);
            tokens.push(self.args.sep_token);
            tokens.extend_from_slice(ids);
            self.total_tokens += tokens.len() as u64;
            writer.add_array(&tokens)?;
        }
        let report = writer.finish()?;
        self.total_discarded += report.discarded_tokens as u64;
        self.total_chunks += report.chunks.len();
        self.writer_index += 1;
        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn renders_languages_in_sorted_order() {
        let rec = record(&[("fr", "bonjour"), ("en", "hello")]);
        assert_eq!(render_record(&rec, false), "en: hello\nfr: bonjour");
        assert_eq!(render_record(&rec, true), "fr: bonjour\nen: hello");
    }

    #[test]
    fn reorder_rejects_out_of_range() {
        let records = vec![record(&[("en", "a")]), record(&[("en", "b")])];
        assert!(reorder(&records, &[1, 0]).is_ok());
        assert!(reorder(&records, &[2, 0]).is_err());
    }
}
