//! Globbing through a [`Runtime`].

use globset::GlobBuilder;
use std::path::{Path, PathBuf};

use super::{Runtime, RuntimeError, RuntimeResult};

/// Files under `base` matching `pattern` (relative to `base`, `/`-separated).
///
/// `*` does not cross directory boundaries; only `**` descends arbitrarily
/// deep. Results are absolute paths in sorted order.
pub async fn glob_files(
    runtime: &dyn Runtime,
    base: &Path,
    pattern: &str,
) -> RuntimeResult<Vec<PathBuf>> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|err| RuntimeError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?
        .compile_matcher();

    let max_depth = if pattern.contains("**") {
        usize::MAX
    } else {
        pattern.split('/').count()
    };

    let mut matches = Vec::new();
    let mut pending: Vec<(PathBuf, usize)> = vec![(PathBuf::new(), 0)];
    while let Some((relative, depth)) = pending.pop() {
        let dir = base.join(&relative);
        let entries = match runtime.read_dir(&dir).await {
            Ok(entries) => entries,
            Err(RuntimeError::FileNotFound(_)) if depth == 0 => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        for name in entries {
            let child = relative.join(&name);
            let metadata = runtime.metadata(&base.join(&child)).await?;
            if metadata.is_dir {
                if depth + 1 < max_depth {
                    pending.push((child, depth + 1));
                }
            } else if matcher.is_match(child.to_string_lossy().replace('\\', "/")) {
                matches.push(base.join(child));
            }
        }
    }

    matches.sort();
    Ok(matches)
}
