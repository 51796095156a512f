use crate::{IndexerError, Result};
use fs2::FileExt;
use lookalike_vector_store::ArtifactPaths;
use std::time::Instant;

/// Exclusive advisory lock held for the whole of a rebuild.
pub(crate) struct BuildLock {
    file: std::fs::File,
    wait_ms: u64,
}

impl BuildLock {
    pub(crate) const fn wait_ms(&self) -> u64 {
        self.wait_ms
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub(crate) async fn acquire_build_lock(paths: &ArtifactPaths) -> Result<BuildLock> {
    let path = paths.build_lock_path();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tokio::task::spawn_blocking(move || -> Result<BuildLock> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                IndexerError::Other(format!("open build lock {}: {err}", path.display()))
            })?;

        let start = Instant::now();
        file.lock_exclusive().map_err(|err| {
            IndexerError::Other(format!("acquire build lock {}: {err}", path.display()))
        })?;
        let wait_ms = start.elapsed().as_millis() as u64;
        if wait_ms > 0 {
            log::debug!("Waited {wait_ms}ms for build lock {}", path.display());
        }

        Ok(BuildLock { file, wait_ms })
    })
    .await
    .map_err(|err| IndexerError::Other(format!("join build lock task: {err}")))?
}
