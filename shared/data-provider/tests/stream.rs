use std::collections::HashSet;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use weft_core::{Shuffle, TokenSize};
use weft_data_provider::{
    files_with_prefix, ChunkWriter, CombinedStream, PackedReader, PackedReaderConfig, TokenBlock,
};

/// Write `n_tokens` sequential ids (offset by `base`) into chunks of
/// `capacity` under `prefix`, returning the discovered (sorted) file list.
fn write_corpus(
    dir: &std::path::Path,
    prefix: &str,
    n_tokens: u32,
    capacity: usize,
    base: u32,
) -> Vec<PathBuf> {
    let mut writer = ChunkWriter::new(dir, prefix, capacity, TokenSize::TwoBytes).unwrap();
    let tokens: Vec<u32> = (0..n_tokens).map(|t| base + t).collect();
    writer.add_array(&tokens).unwrap();
    writer.finish().unwrap();
    files_with_prefix(dir, prefix).unwrap()
}

fn collect_blocks(reader: PackedReader) -> Vec<TokenBlock> {
    reader.map(|b| b.unwrap()).collect()
}

#[test]
fn round_trip_drops_only_the_tail() {
    let dir = tempfile::tempdir().unwrap();
    // 100 tokens at capacity 16: six full chunks, four tokens discarded
    let files = write_corpus(dir.path(), "slim", 100, 16, 0);
    assert_eq!(files.len(), 6);

    let reader = PackedReader::new(
        files,
        PackedReaderConfig {
            block_size: 8,
            ..Default::default()
        },
    )
    .unwrap();
    let tokens: Vec<i32> = collect_blocks(reader).into_iter().flatten().collect();
    assert_eq!(tokens, (0..96).collect::<Vec<i32>>());
}

#[test]
fn blocks_are_exactly_block_sized() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_corpus(dir.path(), "slim", 64, 16, 0);
    let reader = PackedReader::new(
        files,
        PackedReaderConfig {
            block_size: 5, // does not divide capacity: 3 blocks per chunk, 1 token unused
            ..Default::default()
        },
    )
    .unwrap();
    let blocks = collect_blocks(reader);
    assert_eq!(blocks.len(), 12);
    assert!(blocks.iter().all(|b| b.len() == 5));
}

#[test]
fn partition_union_is_the_full_stream() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_corpus(dir.path(), "slim", 16 * 12, 16, 0);
    let config = |rank, world_size| PackedReaderConfig {
        block_size: 8,
        window_chunks: 4,
        shuffle: Shuffle::Seeded(1234),
        rank,
        world_size,
    };

    let full: HashSet<TokenBlock> = collect_blocks(
        PackedReader::new(files.clone(), config(0, 1)).unwrap(),
    )
    .into_iter()
    .collect();

    let mut union: HashSet<TokenBlock> = HashSet::new();
    let mut total = 0usize;
    for rank in 0..3 {
        let blocks = collect_blocks(PackedReader::new(files.clone(), config(rank, 3)).unwrap());
        total += blocks.len();
        for block in blocks {
            assert!(union.insert(block), "rank {rank} repeated a block");
        }
    }
    assert_eq!(total, full.len());
    assert_eq!(union, full);
}

#[test]
fn same_seed_same_order() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_corpus(dir.path(), "slim", 16 * 12, 16, 0);
    let config = PackedReaderConfig {
        block_size: 16,
        window_chunks: 3,
        shuffle: Shuffle::Seeded(99),
        ..Default::default()
    };
    let a = collect_blocks(PackedReader::new(files.clone(), config.clone()).unwrap());
    let b = collect_blocks(PackedReader::new(files.clone(), config.clone()).unwrap());
    assert_eq!(a, b);

    let c = collect_blocks(
        PackedReader::new(
            files,
            PackedReaderConfig {
                shuffle: Shuffle::Seeded(100),
                ..config
            },
        )
        .unwrap(),
    );
    assert_ne!(a, c);
}

#[test]
fn shuffle_stays_inside_the_window() {
    let dir = tempfile::tempdir().unwrap();
    // 12 files, two 8-token blocks each; window of 2 files = 4 blocks
    let files = write_corpus(dir.path(), "slim", 16 * 12, 16, 0);
    let blocks = collect_blocks(
        PackedReader::new(
            files,
            PackedReaderConfig {
                block_size: 8,
                window_chunks: 2,
                shuffle: Shuffle::Seeded(7),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    assert_eq!(blocks.len(), 24);

    // every window's blocks must come from exactly the two files that make
    // it up — a block never crosses a window boundary
    for window in blocks.chunks(4) {
        let source_files: HashSet<i32> = window.iter().map(|b| b[0] / 16).collect();
        assert_eq!(source_files.len(), 2, "window mixes {source_files:?}");
        for block in window {
            let file = block[0] / 16;
            assert!(block.iter().all(|&t| t / 16 == file));
        }
    }
}

#[test]
fn unshuffled_partition_is_round_robin() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_corpus(dir.path(), "slim", 16 * 2, 16, 0);
    // 4 blocks of 8 tokens; rank 1 of 2 owns rows 1 and 3
    let blocks = collect_blocks(
        PackedReader::new(
            files,
            PackedReaderConfig {
                block_size: 8,
                rank: 1,
                world_size: 2,
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let firsts: Vec<i32> = blocks.iter().map(|b| b[0]).collect();
    assert_eq!(firsts, vec![8, 24]);
}

#[test]
fn combined_stream_is_deterministic_and_ends_at_first_dry_source() {
    let dir = tempfile::tempdir().unwrap();
    let slim = write_corpus(dir.path(), "slim", 16 * 6, 16, 0);
    let parallel = write_corpus(dir.path(), "parallel", 16 * 6, 16, 10_000);
    let reader = |files: &Vec<PathBuf>| {
        PackedReader::new(
            files.clone(),
            PackedReaderConfig {
                block_size: 16,
                ..Default::default()
            },
        )
        .unwrap()
    };

    let run = |seed: u64| -> (Vec<TokenBlock>, Option<usize>) {
        let mut stream = CombinedStream::new(
            vec![reader(&slim), reader(&parallel)],
            &[1.0, 1.0],
            seed,
        )
        .unwrap();
        let blocks: Vec<TokenBlock> = stream.by_ref().map(|b| b.unwrap()).collect();
        (blocks, stream.exhausted_source())
    };

    let (a, a_exhausted) = run(5);
    let (b, b_exhausted) = run(5);
    assert_eq!(a, b);
    assert_eq!(a_exhausted, b_exhausted);
    let exhausted = a_exhausted.expect("a source must have ended the pass");
    assert!(exhausted < 2);
    // the pass ends at the FIRST dry source; the survivor's remainder is unread
    assert!(a.len() <= 12);
    assert!(a.len() >= 6);
}

#[test]
fn combined_stream_weights_zero_never_draws() {
    let dir = tempfile::tempdir().unwrap();
    let slim = write_corpus(dir.path(), "slim", 16 * 4, 16, 0);
    let parallel = write_corpus(dir.path(), "parallel", 16 * 4, 16, 10_000);
    let make = |files: &Vec<PathBuf>| {
        PackedReader::new(
            files.clone(),
            PackedReaderConfig {
                block_size: 16,
                ..Default::default()
            },
        )
        .unwrap()
    };
    let mut stream =
        CombinedStream::new(vec![make(&slim), make(&parallel)], &[1.0, 0.0], 42).unwrap();
    assert_eq!(stream.normalized_weights(), &[1.0, 0.0]);
    let blocks: Vec<TokenBlock> = stream.by_ref().map(|b| b.unwrap()).collect();
    // only the first source is ever drawn, in its own order
    let tokens: Vec<i32> = blocks.into_iter().flatten().collect();
    assert_eq!(tokens, (0..64).collect::<Vec<i32>>());
    assert_eq!(stream.exhausted_source(), Some(0));
}

#[test]
fn corrupt_chunk_is_a_fatal_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_corpus(dir.path(), "slim", 16 * 2, 16, 0);
    std::fs::write(&files[1], b"WEFTPKD garbage").unwrap();

    let mut reader = PackedReader::new(
        files,
        PackedReaderConfig {
            block_size: 16,
            window_chunks: 8,
            ..Default::default()
        },
    )
    .unwrap();
    let first = reader.next().unwrap();
    assert!(first.is_err());
    assert!(reader.next().is_none(), "a failed reader stays ended");
}
