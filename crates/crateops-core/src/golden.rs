//! Golden-image regression testing.
//!
//! Every example target of the configured package is run with
//! `--no-show --output-dir <dir> --save-png`, then the rendered images are
//! compared against a directory of reference ("golden") images:
//!
//! 1. The two directories must contain exactly the same file names.
//! 2. Each pair is decoded, converted to RGBA8 and compared channel by
//!    channel with an absolute tolerance.
//!
//! Pixel mismatches are collected rather than raised so one run reports
//! every drifting image.

use std::collections::BTreeSet;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use image::RgbaImage;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::GoldenConfig;
use crate::package::{self, PackageError};
use crate::toolchain::{Action, Invocation, Toolchain, ToolchainError, run_checked};

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors from the golden-image stage.
#[derive(Error, Debug)]
pub enum GoldenError {
    /// The example package could not be resolved.
    #[error(transparent)]
    Package(#[from] PackageError),

    /// An example failed to run.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// The rendered file set differs from the golden file set.
    #[error("golden and test outputs differ: missing {missing:?}, extra {extra:?}")]
    FileSetMismatch {
        /// Golden files with no rendered counterpart.
        missing: Vec<String>,
        /// Rendered files with no golden counterpart.
        extra: Vec<String>,
    },

    /// An image could not be decoded.
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// Image path.
        path: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Strict mode: at least one image exceeded the tolerance.
    #[error("{} image(s) differ from golden outputs: {}", .0.len(), .0.join(", "))]
    Mismatched(Vec<String>),

    /// Filesystem error.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being done.
        action: &'static str,
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Result alias for golden-image operations.
pub type GoldenResult<T> = Result<T, GoldenError>;

fn io_err<'a>(
    action: &'static str,
    path: &'a Utf8Path,
) -> impl FnOnce(io::Error) -> GoldenError + 'a {
    move |source| GoldenError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

// ──────────────────────────────────────────────
// Comparison
// ──────────────────────────────────────────────

/// Why two images are considered different.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Mismatch {
    /// Width or height differ.
    Dimensions {
        /// Golden `(width, height)`.
        golden: (u32, u32),
        /// Rendered `(width, height)`.
        test: (u32, u32),
    },
    /// Some channel differs by more than the tolerance.
    Pixels {
        /// Largest absolute channel difference seen.
        max_diff: u8,
        /// Number of channel values beyond the tolerance.
        channels_over: u64,
    },
}

/// A rendered image that drifted from its golden counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMismatch {
    /// File name.
    pub name: String,
    /// How it differs.
    pub mismatch: Mismatch,
}

/// Compare two decoded images channel by channel.
///
/// Returns `None` when every channel is within `tolerance`.
pub fn compare_images(golden: &RgbaImage, test: &RgbaImage, tolerance: u8) -> Option<Mismatch> {
    if golden.dimensions() != test.dimensions() {
        return Some(Mismatch::Dimensions {
            golden: golden.dimensions(),
            test: test.dimensions(),
        });
    }

    let mut max_diff = 0u8;
    let mut channels_over = 0u64;
    for (g, t) in golden.as_raw().iter().zip(test.as_raw()) {
        let diff = g.abs_diff(*t);
        max_diff = max_diff.max(diff);
        if diff > tolerance {
            channels_over += 1;
        }
    }

    (channels_over > 0).then_some(Mismatch::Pixels {
        max_diff,
        channels_over,
    })
}

/// Check that both directories hold the same file names.
///
/// Returns the common names in sorted order.
pub fn compare_sets(
    golden: &BTreeSet<String>,
    test: &BTreeSet<String>,
) -> GoldenResult<Vec<String>> {
    let missing: Vec<String> = golden.difference(test).cloned().collect();
    let extra: Vec<String> = test.difference(golden).cloned().collect();
    if !missing.is_empty() || !extra.is_empty() {
        return Err(GoldenError::FileSetMismatch { missing, extra });
    }
    Ok(golden.iter().cloned().collect())
}

/// Names of the regular files directly inside `dir`.
pub fn list_images(dir: &Utf8Path) -> GoldenResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in dir.read_dir_utf8().map_err(io_err("failed to list", dir))? {
        let entry = entry.map_err(io_err("failed to list", dir))?;
        if entry.file_type().map_err(io_err("failed to stat", entry.path()))?.is_file() {
            names.insert(entry.file_name().to_string());
        }
    }
    Ok(names)
}

fn decode(path: &Utf8Path) -> GoldenResult<RgbaImage> {
    let img = image::open(path).map_err(|source| GoldenError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_rgba8())
}

/// Result of comparing a rendered directory against the golden one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Comparison {
    /// Number of image pairs compared.
    pub compared: usize,
    /// Pairs beyond the tolerance.
    pub mismatches: Vec<ImageMismatch>,
}

/// Compare every image in `test_dir` against `golden_dir`.
#[instrument(fields(%golden_dir, %test_dir))]
pub fn compare_dirs(
    golden_dir: &Utf8Path,
    test_dir: &Utf8Path,
    tolerance: u8,
) -> GoldenResult<Comparison> {
    let names = compare_sets(&list_images(golden_dir)?, &list_images(test_dir)?)?;

    let mut comparison = Comparison::default();
    for name in names {
        let golden = decode(&golden_dir.join(&name))?;
        let test = decode(&test_dir.join(&name))?;
        comparison.compared += 1;
        match compare_images(&golden, &test, tolerance) {
            Some(mismatch) => {
                warn!(image = %name, ?mismatch, "image differs from golden output");
                comparison.mismatches.push(ImageMismatch { name, mismatch });
            }
            None => debug!(image = %name, "image matches"),
        }
    }
    Ok(comparison)
}

// ──────────────────────────────────────────────
// Stage
// ──────────────────────────────────────────────

/// Outcome of the golden-image stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GoldenReport {
    /// Examples that were run, in manifest order.
    pub examples: Vec<String>,
    /// Image comparison results.
    pub comparison: Comparison,
}

/// Example targets of the package in `dir`, minus `exclude`.
pub fn examples_to_run(
    toolchain: &dyn Toolchain,
    dir: &Utf8Path,
    exclude: &[String],
) -> GoldenResult<Vec<String>> {
    let pkg = package::resolve(toolchain, dir)?;
    Ok(pkg
        .examples()
        .filter(|name| !exclude.iter().any(|ex| ex == name))
        .map(str::to_string)
        .collect())
}

/// Run one example so it writes its images into `output_dir`.
pub fn run_example(
    toolchain: &dyn Toolchain,
    dir: &Utf8Path,
    example: &str,
    output_dir: &Utf8Path,
) -> GoldenResult<()> {
    let invocation = Invocation::new(dir, Action::Run).args([
        "--example",
        example,
        "--",
        "--no-show",
        "--output-dir",
        output_dir.as_str(),
        "--save-png",
    ]);
    run_checked(toolchain, &invocation)?;
    Ok(())
}

/// Render every example and compare the results with the golden images.
///
/// `root` anchors the configured package and image directories. The output
/// directory is recreated first so stale renders never count as extras.
/// With `config.strict` unset, pixel mismatches are reported but do not
/// fail the stage.
#[instrument(skip(toolchain, config, on_example), fields(%root))]
pub fn test_outputs(
    toolchain: &dyn Toolchain,
    root: &Utf8Path,
    config: &GoldenConfig,
    on_example: &mut dyn FnMut(&str),
) -> GoldenResult<GoldenReport> {
    let package_dir = root.join(&config.package);
    let output_dir = root.join(&config.output_dir);
    let golden_dir = root.join(&config.golden_dir);

    match std::fs::remove_dir_all(&output_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(io_err("failed to remove", &output_dir)(source)),
    }
    std::fs::create_dir_all(&output_dir).map_err(io_err("failed to create", &output_dir))?;

    let examples = examples_to_run(toolchain, &package_dir, &config.exclude)?;
    for example in &examples {
        on_example(example);
        run_example(toolchain, &package_dir, example, &output_dir)?;
    }
    info!(count = examples.len(), "rendered examples");

    let comparison = compare_dirs(&golden_dir, &output_dir, config.tolerance)?;
    info!(
        compared = comparison.compared,
        mismatched = comparison.mismatches.len(),
        "compared with golden outputs"
    );

    if config.strict && !comparison.mismatches.is_empty() {
        return Err(GoldenError::Mismatched(
            comparison.mismatches.iter().map(|m| m.name.clone()).collect(),
        ));
    }

    Ok(GoldenReport {
        examples,
        comparison,
    })
}
