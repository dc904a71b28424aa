use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{info, warn};

use shared::{
    operation::Operation,
    protocol::{PersistedOperation, QueueSnapshot},
};

/// Durable store for the pending-operation queue.
///
/// The backing file holds a single [`QueueSnapshot`]. Writes go through a
/// sibling temp file and a rename so a crash mid-write leaves the previous
/// snapshot intact.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads whatever survived the last shutdown, in the order it was
    /// persisted. A missing file is an empty queue. A file that does not
    /// parse, or that was written by an incompatible release, is discarded
    /// with a warning rather than blocking startup.
    pub fn load(&self) -> Result<Vec<Operation>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read queue snapshot '{}'", self.path.display())
                })
            }
        };

        let snapshot: QueueSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "queue snapshot is corrupted; discarding it"
                );
                self.clear()?;
                return Ok(Vec::new());
            }
        };

        if !snapshot.is_compatible() {
            warn!(
                path = %self.path.display(),
                version = %snapshot.version,
                "queue snapshot was written by an incompatible release; discarding it"
            );
            self.clear()?;
            return Ok(Vec::new());
        }

        if !snapshot.items.is_empty() {
            info!(
                path = %self.path.display(),
                items = snapshot.items.len(),
                "rehydrating persisted queue"
            );
        }
        Ok(snapshot.items.into_iter().map(Operation::from).collect())
    }

    /// Persists `ops` in the given (pop) order, replacing any previous
    /// snapshot.
    pub fn save(&self, ops: &[Operation]) -> Result<()> {
        let snapshot = QueueSnapshot::new(ops.iter().map(PersistedOperation::from).collect());
        self.write_snapshot(&snapshot)
    }

    /// Rewrites the file with an empty item list. Called right after a
    /// successful load so a crash before the next clean shutdown cannot
    /// replay items that were already rehydrated.
    pub fn clear(&self) -> Result<()> {
        self.write_snapshot(&QueueSnapshot::empty())
    }

    fn write_snapshot(&self, snapshot: &QueueSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "failed to create parent directory '{}' for queue snapshot",
                        parent.display()
                    )
                })?;
            }
        }

        let encoded = serde_json::to_string_pretty(snapshot)
            .context("failed to encode queue snapshot")?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, encoded).with_context(|| {
            format!("failed to write queue snapshot '{}'", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move queue snapshot into place at '{}'",
                self.path.display()
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/queue_store_tests.rs"]
mod tests;
