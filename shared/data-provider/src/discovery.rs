use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DataError, Result};

/// Collect every `{prefix}*` file directly under `dir`, lexicographically
/// sorted. This is the canonical base order: any shuffle or partition step
/// downstream starts from it, and the writer's zero-padded chunk indices make
/// it equal to creation order.
pub fn files_with_prefix(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| DataError::storage(e, dir))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DataError::storage(e, dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with(prefix) {
                files.push(path);
            }
        }
    }
    files.sort();
    debug!(
        dir = %dir.display(),
        prefix,
        files = files.len(),
        "discovered corpus files"
    );
    Ok(files)
}
