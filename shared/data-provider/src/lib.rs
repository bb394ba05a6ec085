mod chunk;
mod discovery;
mod error;
mod interleave;
mod packed;
mod weighted;

pub use chunk::{
    ChunkHeader, ChunkWriter, ChunkWriterReport, CHUNK_HEADER_SIZE, CHUNK_MAGIC, CHUNK_VERSION,
};
pub use discovery::files_with_prefix;
pub use error::{DataError, Result};
pub use interleave::{interleave_files, InterleaveOptions, PlacementPolicy};
pub use packed::{PackedReader, PackedReaderConfig, TokenBlock};
pub use weighted::CombinedStream;
