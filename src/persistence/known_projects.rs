//! Index of working directories that have hosted sessions.
//!
//! Session documents live inside each project, so the daemon keeps this small
//! list to find them again after a restart and for retention sweeps.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::Result;

use super::atomic_write;

/// Persisted set of project directories.
#[derive(Debug)]
pub struct KnownProjects {
    path: PathBuf,
    entries: Mutex<BTreeSet<PathBuf>>,
}

impl KnownProjects {
    /// Load the index at `path`; a missing or corrupt file starts empty.
    #[must_use]
    pub fn load(path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<BTreeSet<PathBuf>>(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "ignoring corrupt project index");
                BTreeSet::new()
            }),
            Err(_) => BTreeSet::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Add `cwd` to the index, persisting only when it is new.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if the index cannot be written.
    pub fn record(&self, cwd: &Path) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.insert(cwd.to_path_buf()) {
            return Ok(());
        }
        let body = serde_json::to_vec_pretty(&*entries)?;
        atomic_write(&self.path, &body)
    }

    #[must_use]
    pub fn list(&self) -> Vec<PathBuf> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
