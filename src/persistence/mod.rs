//! Persistence layer modules.

pub mod known_projects;
pub mod retention;
pub mod state_store;

use std::io::Write;
use std::path::Path;

use crate::{AppError, Result};

pub use known_projects::KnownProjects;
pub use state_store::{JsonFileBackend, SessionBackend, StateStore};

/// Write `data` to `path` via a temp file in the same directory and a rename.
///
/// A crash mid-write leaves the previous document intact. The temp file is
/// removed automatically if the rename never happens.
///
/// # Errors
///
/// Returns `AppError::State` if any step fails.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::State(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(dir)
        .map_err(|err| AppError::State(format!("failed to create {}: {err}", dir.display())))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".state.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|err| AppError::State(format!("failed to create temp file: {err}")))?;
    tmp.write_all(data)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::State(format!("failed to write temp file: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::State(format!("failed to replace {}: {}", path.display(), err.error))
    })?;
    Ok(())
}
