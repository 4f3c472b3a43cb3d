//! Version stamping for `#auto`-managed manifest lines.
//!
//! A manifest opts a line into stamping by ending it with an `#auto` marker:
//!
//! ```toml
//! version = "0.4.1" #auto
//! gnuplot = { path = "..", version = "=0.4.1" } # not managed
//! gnuplot_core = { version = "=0.4.1" } #auto   # not a version line either
//! ```
//!
//! Only lines of the form `version = "<=?>payload" #auto` are rewritten, and
//! only the payload changes. [`stamp_version`] is a pure text transform;
//! [`stamp_manifest`] is the filesystem adapter around it.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};
use semver::Version;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from version stamping.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The requested version is not valid semver.
    #[error("invalid version {version:?}: {source}")]
    InvalidVersion {
        /// The rejected input.
        version: String,
        /// Parser error.
        #[source]
        source: semver::Error,
    },

    /// The manifest could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest has no `#auto` version line.
    #[error("{path} has no `version = \"...\" #auto` line")]
    NoMarker {
        /// Manifest path.
        path: Utf8PathBuf,
    },
}

/// Result alias for stamping operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// File name of a package manifest.
pub const MANIFEST_FILE: &str = "Cargo.toml";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"version = "(=?)[^"]*" #auto"#).expect("marker pattern is valid")
});

/// Result of stamping a manifest's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped {
    /// The rewritten manifest text.
    pub text: String,
    /// Number of marker lines that were rewritten.
    pub replaced: usize,
}

/// Parse a version argument, accepting an optional leading `v`.
pub fn parse_version(input: &str) -> ManifestResult<Version> {
    let trimmed = input.strip_prefix('v').unwrap_or(input);
    Version::parse(trimmed).map_err(|source| ManifestError::InvalidVersion {
        version: input.to_string(),
        source,
    })
}

/// Rewrite every `#auto` version line in `text` to `version`.
///
/// Line endings (including a missing final newline and `\r\n`) are kept, and
/// every line without the marker is returned unchanged.
pub fn stamp_version(text: &str, version: &Version) -> Stamped {
    let payload = version.to_string();
    let mut out = String::with_capacity(text.len());
    let mut replaced = 0;

    for line in text.split_inclusive('\n') {
        if MARKER.is_match(line) {
            replaced += 1;
            let rewritten = MARKER.replace(line, |caps: &Captures<'_>| {
                format!(r#"version = "{}{payload}" #auto"#, &caps[1])
            });
            out.push_str(&rewritten);
        } else {
            out.push_str(line);
        }
    }

    Stamped {
        text: out,
        replaced,
    }
}

/// Stamp `version` into the manifest at `path`.
///
/// Returns the number of rewritten lines. A manifest without any marker line
/// is an error; the file is left untouched in that case.
#[instrument(fields(%path, %version))]
pub fn stamp_manifest(path: &Utf8Path, version: &Version) -> ManifestResult<usize> {
    let original = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let stamped = stamp_version(&original, version);
    if stamped.replaced == 0 {
        return Err(ManifestError::NoMarker {
            path: path.to_path_buf(),
        });
    }

    if stamped.text != original {
        std::fs::write(path, &stamped.text).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }

    debug!(replaced = stamped.replaced, "stamped manifest");
    Ok(stamped.replaced)
}
