//! Checkpoint naming and discovery. Blob serialization belongs to the
//! runtime; this module owns only the path convention and the
//! select-the-newest logic used for resumption.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::TrainerError;

/// Checkpoint filename for an iteration:
/// `iter-{iteration:06}-token-{total_tokens}-ckpt`.
pub fn checkpoint_name(iteration: u64, total_tokens: u64) -> String {
    format!("iter-{iteration:06}-token-{total_tokens}-ckpt")
}

/// Parse the iteration counter out of a conforming checkpoint filename.
pub fn parse_checkpoint_iteration(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("iter-")?;
    let (iteration, rest) = rest.split_once("-token-")?;
    let tokens = rest.strip_suffix("-ckpt")?;
    tokens.parse::<u64>().ok()?;
    iteration.parse::<u64>().ok()
}

/// Find the checkpoint with the highest iteration number under `dir`.
/// A missing directory means there is nothing to resume, not an error.
pub fn find_latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>, TrainerError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TrainerError::Io {
                source: e,
                path: dir.to_path_buf(),
            })
        }
    };
    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| TrainerError::Io {
            source: e,
            path: dir.to_path_buf(),
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(iteration) = parse_checkpoint_iteration(name) {
            if latest.as_ref().map_or(true, |(best, _)| iteration > *best) {
                latest = Some((iteration, path));
            }
        }
    }
    if let Some((iteration, path)) = &latest {
        debug!(iteration, path = %path.display(), "found latest checkpoint");
    }
    Ok(latest.map(|(_, path)| path))
}
