//! Lockfile and build artifact removal.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::toolchain::{Action, Invocation, Toolchain, ToolchainError, run_checked};

/// Name of the lockfile removed before `cargo clean`.
pub const LOCKFILE: &str = "Cargo.lock";

/// Errors from the clean stage.
#[derive(Error, Debug)]
pub enum CleanError {
    /// The lockfile exists but could not be removed.
    #[error("failed to remove {path}: {source}")]
    RemoveLockfile {
        /// Lockfile path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// `cargo clean` failed.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
}

/// Result alias for clean operations.
pub type CleanResult<T> = Result<T, CleanError>;

/// What was cleaned in one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cleaned {
    /// Package directory.
    pub dir: Utf8PathBuf,
    /// Whether a lockfile was removed.
    pub removed_lockfile: bool,
}

/// Remove `Cargo.lock` from `dir` if present.
///
/// Returns whether a file was removed.
pub fn remove_lockfile(dir: &Utf8Path) -> CleanResult<bool> {
    let path = dir.join(LOCKFILE);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(%path, "no lockfile");
            Ok(false)
        }
        Err(source) => Err(CleanError::RemoveLockfile { path, source }),
    }
}

/// Clean each directory in order: drop the lockfile, then `cargo clean`.
#[instrument(skip(toolchain, dirs, on_package))]
pub fn clean(
    toolchain: &dyn Toolchain,
    dirs: &[Utf8PathBuf],
    verbose: bool,
    on_package: &mut dyn FnMut(&Utf8Path),
) -> CleanResult<Vec<Cleaned>> {
    let mut cleaned = Vec::with_capacity(dirs.len());
    for dir in dirs {
        on_package(dir);
        let removed_lockfile = remove_lockfile(dir)?;
        run_checked(toolchain, &Invocation::new(dir, Action::Clean).verbose(verbose))?;
        info!(%dir, removed_lockfile, "cleaned");
        cleaned.push(Cleaned {
            dir: dir.clone(),
            removed_lockfile,
        });
    }
    Ok(cleaned)
}
