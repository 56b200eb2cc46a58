use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{GalesError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CacheStatus {
    /// The sentinel already existed, the producer was not run.
    Reused,
    /// The producer ran and the sentinel was written.
    Computed,
}

/// Sentinel-file memoization: a derived file is computed once and reused by
/// every later run for as long as it exists on disk.
///
/// Producers never write the sentinel directly. They are handed a staging
/// path inside a private directory next to the sentinel, and the result is
/// renamed into place only after the producer returns `Ok`, so a crash or
/// failure can never leave a truncated sentinel behind.
#[derive(Debug, Default)]
pub struct CacheGate {
    produced: HashSet<PathBuf>,
}

impl CacheGate {
    pub fn new() -> CacheGate {
        CacheGate::default()
    }

    pub fn ensure<F>(&mut self, sentinel: &Path, producer: F) -> Result<CacheStatus>
        where F: FnOnce(&Path) -> Result<()>
    {
        if self.produced.contains(sentinel) || sentinel.exists() {
            info!(path = %sentinel.display(), status = "reused", "found cached output");
            return Ok(CacheStatus::Reused);
        }

        let dir = match sentinel.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file_name = sentinel.file_name()
            .ok_or_else(|| GalesError::SentinelNotCreated(sentinel.to_path_buf()))?;

        let staging_dir = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(dir)
            .map_err(|e| GalesError::io(dir, e))?;
        let staging = staging_dir.path().join(file_name);

        info!(path = %sentinel.display(), "cached output not found, computing");
        producer(&staging)?;

        if !staging.exists() {
            return Err(GalesError::SentinelNotCreated(sentinel.to_path_buf()));
        }
        std::fs::rename(&staging, sentinel).map_err(|e| GalesError::io(sentinel, e))?;

        self.produced.insert(sentinel.to_path_buf());
        info!(path = %sentinel.display(), status = "computed", "wrote cached output");
        Ok(CacheStatus::Computed)
    }
}
