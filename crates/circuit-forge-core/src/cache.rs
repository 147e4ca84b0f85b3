//! Skip-unless-forced gate in front of every stage.
//!
//! Presence of the target path is the whole cache key: no hashes, timestamps
//! or tool versions are consulted. Only `force` invalidates.

use std::path::Path;

use crate::error::StageError;

/// What a stage should do about its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Target is absent (or was just removed by a forced rebuild).
    Run,
    /// Target is present and the build is not forced.
    Skip,
}

impl CacheDecision {
    pub fn should_run(self) -> bool {
        self == Self::Run
    }
}

/// Whether a filesystem entry exists at `path`. Dangling symlinks count.
pub async fn is_present(path: &Path) -> Result<bool, StageError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StageError::fs("inspect", path, e)),
    }
}

/// Decide whether the stage producing `target` must run.
///
/// With `force`, an existing target is deleted first (recursively for a
/// directory); a failed delete is a stage failure.
pub async fn gate(target: &Path, force: bool) -> Result<CacheDecision, StageError> {
    let metadata = match tokio::fs::symlink_metadata(target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("cache miss: {}", target.display());
            return Ok(CacheDecision::Run);
        }
        Err(e) => return Err(StageError::fs("inspect", target, e)),
    };

    if !force {
        tracing::debug!("cache hit: {}", target.display());
        return Ok(CacheDecision::Skip);
    }

    tracing::debug!("forced rebuild, removing {}", target.display());
    remove(target, metadata.is_dir()).await?;

    Ok(CacheDecision::Run)
}

async fn remove(target: &Path, is_dir: bool) -> Result<(), StageError> {
    let removed = if is_dir {
        tokio::fs::remove_dir_all(target).await
    } else {
        tokio::fs::remove_file(target).await
    };
    removed.map_err(|e| StageError::fs("remove", target, e))
}
