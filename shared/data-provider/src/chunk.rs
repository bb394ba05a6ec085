//! Packed chunk file format.
//!
//! A chunk is an immutable binary artifact, little-endian throughout:
//!
//! - magic: `b"WEFTPKD"` (7 bytes)
//! - version: u64 (currently 1)
//! - dtype: u8, the token width in bytes (2 or 4)
//! - capacity: u64, element count
//! - payload: exactly `capacity` elements of `dtype` width
//!
//! A chunk on disk always holds exactly `capacity` valid elements. The writer
//! refuses to emit a partial final chunk: a tail padded out with separator
//! ids would look like valid training data.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use weft_core::TokenSize;

use crate::error::{DataError, Result};

pub const CHUNK_MAGIC: &[u8; 7] = b"WEFTPKD";
pub const CHUNK_VERSION: u64 = 1;
pub const CHUNK_HEADER_SIZE: usize = 24;

/// Parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub token_size: TokenSize,
    pub capacity: u64,
}

impl ChunkHeader {
    /// Parse and validate the header of a mapped chunk file, including that
    /// the file is long enough for its declared capacity.
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(DataError::malformed(path, "file too short for a header"));
        }
        if &data[0..7] != CHUNK_MAGIC {
            return Err(DataError::malformed(path, "bad magic"));
        }
        let version = u64::from_le_bytes(data[7..15].try_into().unwrap());
        if version != CHUNK_VERSION {
            return Err(DataError::malformed(
                path,
                format!("unsupported version {version}"),
            ));
        }
        let token_size = match data[15] {
            2 => TokenSize::TwoBytes,
            4 => TokenSize::FourBytes,
            other => {
                return Err(DataError::malformed(
                    path,
                    format!("unknown dtype code {other}"),
                ))
            }
        };
        let capacity = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let expected = CHUNK_HEADER_SIZE + capacity as usize * usize::from(token_size);
        if data.len() < expected {
            return Err(DataError::malformed(
                path,
                format!("expected {expected} bytes, found {}", data.len()),
            ));
        }
        Ok(Self {
            token_size,
            capacity,
        })
    }

    fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_all(CHUNK_MAGIC)?;
        out.write_all(&CHUNK_VERSION.to_le_bytes())?;
        out.write_all(&[usize::from(self.token_size) as u8])?;
        out.write_all(&self.capacity.to_le_bytes())
    }
}

/// Totals reported once a writer is finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWriterReport {
    pub chunks: Vec<PathBuf>,
    /// Tokens in the final short buffer, dropped rather than padded.
    pub discarded_tokens: usize,
}

/// Serializes token arrays into fixed-capacity chunk files
/// `{prefix}_{index:010}.bin` under one directory. Arrays split across chunk
/// boundaries, so every flushed chunk is exactly full; the zero-padded index
/// keeps lexicographic order equal to creation order.
pub struct ChunkWriter {
    out_dir: PathBuf,
    prefix: String,
    capacity: usize,
    token_size: TokenSize,
    buffer: Vec<u32>,
    counter: usize,
    written: Vec<PathBuf>,
}

impl ChunkWriter {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        capacity: usize,
        token_size: TokenSize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(DataError::Config("chunk capacity must be non-zero".into()));
        }
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir).map_err(|e| DataError::storage(e, &out_dir))?;
        Ok(Self {
            out_dir,
            prefix: prefix.into(),
            capacity,
            token_size,
            buffer: Vec::with_capacity(capacity),
            counter: 0,
            written: Vec::new(),
        })
    }

    /// Append one record's token ids to the accumulation buffer, flushing
    /// full chunks as the buffer fills. A write failure is fatal; nothing is
    /// retried.
    pub fn add_array(&mut self, tokens: &[u32]) -> Result<()> {
        if let Some(&id) = tokens.iter().find(|&&t| t > self.token_size.max_token()) {
            return Err(DataError::Config(format!(
                "token id {id} does not fit in a {}-byte token",
                usize::from(self.token_size)
            )));
        }
        let mut rest = tokens;
        while self.buffer.len() + rest.len() >= self.capacity {
            let take = self.capacity - self.buffer.len();
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            self.flush_chunk()?;
        }
        self.buffer.extend_from_slice(rest);
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<()> {
        let path = self
            .out_dir
            .join(format!("{}_{:010}.bin", self.prefix, self.counter));
        let file = File::create(&path).map_err(|e| DataError::storage(e, &path))?;
        let mut out = BufWriter::new(file);
        let header = ChunkHeader {
            token_size: self.token_size,
            capacity: self.capacity as u64,
        };
        header
            .write_to(&mut out)
            .map_err(|e| DataError::storage(e, &path))?;
        match self.token_size {
            TokenSize::TwoBytes => {
                for &token in &self.buffer {
                    out.write_all(&(token as u16).to_le_bytes())
                        .map_err(|e| DataError::storage(e, &path))?;
                }
            }
            TokenSize::FourBytes => {
                for &token in &self.buffer {
                    out.write_all(&token.to_le_bytes())
                        .map_err(|e| DataError::storage(e, &path))?;
                }
            }
        }
        out.flush().map_err(|e| DataError::storage(e, &path))?;
        debug!(path = %path.display(), tokens = self.capacity, "wrote chunk");
        self.counter += 1;
        self.buffer.clear();
        self.written.push(path);
        Ok(())
    }

    pub fn written_chunks(&self) -> usize {
        self.written.len()
    }

    /// Finish the writer. The leftover buffer shorter than one chunk is
    /// discarded, never padded.
    pub fn finish(self) -> Result<ChunkWriterReport> {
        let discarded = self.buffer.len();
        if discarded > 0 {
            info!(
                discarded_tokens = discarded,
                prefix = self.prefix.as_str(),
                "dropping final partial chunk"
            );
        }
        Ok(ChunkWriterReport {
            chunks: self.written,
            discarded_tokens: discarded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_chunks_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChunkWriter::new(dir.path(), "corpus", 8, TokenSize::TwoBytes).unwrap();
        // 3 arrays, 20 tokens total: 2 full chunks of 8, 4 tokens dropped
        writer.add_array(&[1, 2, 3, 4, 5, 6]).unwrap();
        writer.add_array(&[7, 8, 9, 10, 11, 12, 13]).unwrap();
        writer.add_array(&[14, 15, 16, 17, 18, 19, 20]).unwrap();
        let report = writer.finish().unwrap();
        assert_eq!(report.chunks.len(), 2);
        assert_eq!(report.discarded_tokens, 4);
        assert_eq!(
            report.chunks[0].file_name().unwrap().to_str().unwrap(),
            "corpus_0000000000.bin"
        );
        assert_eq!(
            report.chunks[1].file_name().unwrap().to_str().unwrap(),
            "corpus_0000000001.bin"
        );

        let data = std::fs::read(&report.chunks[0]).unwrap();
        let header = ChunkHeader::parse(&report.chunks[0], &data).unwrap();
        assert_eq!(header.capacity, 8);
        assert_eq!(header.token_size, TokenSize::TwoBytes);
        assert_eq!(data.len(), CHUNK_HEADER_SIZE + 8 * 2);
        let first = u16::from_le_bytes([data[CHUNK_HEADER_SIZE], data[CHUNK_HEADER_SIZE + 1]]);
        assert_eq!(first, 1);
    }

    #[test]
    fn array_spanning_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChunkWriter::new(dir.path(), "span", 4, TokenSize::FourBytes).unwrap();
        let tokens: Vec<u32> = (0..10).collect();
        writer.add_array(&tokens).unwrap();
        let report = writer.finish().unwrap();
        assert_eq!(report.chunks.len(), 2);
        assert_eq!(report.discarded_tokens, 2);
    }

    #[test]
    fn rejects_oversized_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ChunkWriter::new(dir.path(), "t", 4, TokenSize::TwoBytes).unwrap();
        let err = writer.add_array(&[70_000]).unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
    }

    #[test]
    fn rejects_bad_headers() {
        let path = Path::new("x.bin");
        assert!(matches!(
            ChunkHeader::parse(path, b"short"),
            Err(DataError::Malformed { .. })
        ));
        let mut bogus = vec![0u8; CHUNK_HEADER_SIZE];
        bogus[0..7].copy_from_slice(b"NOTPKD!");
        assert!(matches!(
            ChunkHeader::parse(path, &bogus),
            Err(DataError::Malformed { .. })
        ));

        // truncated payload
        let mut data = Vec::new();
        ChunkHeader {
            token_size: TokenSize::TwoBytes,
            capacity: 100,
        }
        .write_to(&mut data)
        .unwrap();
        assert!(matches!(
            ChunkHeader::parse(path, &data),
            Err(DataError::Malformed { .. })
        ));
    }
}
