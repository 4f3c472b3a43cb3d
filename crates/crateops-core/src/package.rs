//! Package introspection via `cargo metadata`.
//!
//! The metadata query runs through the [`Toolchain`] like every other cargo
//! call, so the JSON it returns can be stubbed in tests. Parsing is delegated
//! to `cargo_metadata`.

use camino::{Utf8Path, Utf8PathBuf};
use cargo_metadata::MetadataCommand;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::toolchain::{Action, Invocation, Toolchain, ToolchainError, run_checked};

/// Errors from package introspection.
#[derive(Error, Debug)]
pub enum PackageError {
    /// `cargo metadata` failed.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// `cargo metadata` produced output we could not parse.
    #[error("failed to parse cargo metadata for {dir}: {source}")]
    Parse {
        /// Package directory.
        dir: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: cargo_metadata::Error,
    },

    /// The metadata did not contain the package rooted at `dir`.
    #[error("no package found in {dir}")]
    NotFound {
        /// Package directory.
        dir: Utf8PathBuf,
    },
}

/// Result alias for package introspection.
pub type PackageResult<T> = Result<T, PackageError>;

/// A build target of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    /// Target name (e.g. the example name).
    pub name: String,
    /// Whether this is an `[[example]]` target.
    pub example: bool,
}

/// What crateops needs to know about one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    /// Crate name.
    pub name: String,
    /// Declared version.
    pub version: semver::Version,
    /// Absolute path of the manifest.
    pub manifest_path: Utf8PathBuf,
    /// Build targets, in manifest order.
    pub targets: Vec<TargetInfo>,
}

impl PackageInfo {
    /// Names of the example targets.
    pub fn examples(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .filter(|t| t.example)
            .map(|t| t.name.as_str())
    }
}

/// Resolve the package rooted at `dir`.
///
/// Runs `cargo metadata --format-version=1 --no-deps` inside `dir` and picks
/// the package whose manifest lives in that directory (falling back to the
/// only package when there is exactly one).
#[instrument(skip(toolchain), fields(%dir))]
pub fn resolve(toolchain: &dyn Toolchain, dir: &Utf8Path) -> PackageResult<PackageInfo> {
    let invocation =
        Invocation::new(dir, Action::Metadata).args(["--format-version=1", "--no-deps"]);
    let output = run_checked(toolchain, &invocation)?;
    let info = parse_metadata(&output.stdout, dir)?;
    debug!(name = %info.name, version = %info.version, "resolved package");
    Ok(info)
}

/// Pick the package for `dir` out of raw `cargo metadata` JSON.
pub fn parse_metadata(json: &str, dir: &Utf8Path) -> PackageResult<PackageInfo> {
    let metadata = MetadataCommand::parse(json).map_err(|source| PackageError::Parse {
        dir: dir.to_path_buf(),
        source,
    })?;

    let packages = &metadata.packages;
    let selected = packages
        .iter()
        .find(|pkg| manifest_dir_matches(&pkg.manifest_path, dir))
        .or_else(|| match packages.as_slice() {
            [only] => Some(only),
            _ => None,
        })
        .ok_or_else(|| PackageError::NotFound {
            dir: dir.to_path_buf(),
        })?;

    Ok(PackageInfo {
        name: selected.name.to_string(),
        version: selected.version.clone(),
        manifest_path: selected.manifest_path.clone(),
        targets: selected
            .targets
            .iter()
            .map(|t| TargetInfo {
                name: t.name.clone(),
                example: t.is_example(),
            })
            .collect(),
    })
}

/// Whether `manifest_path` sits directly in `dir`.
///
/// `dir` is usually relative while cargo reports absolute paths, so a
/// relative `dir` matches on trailing components; `.` never matches and
/// relies on the single-package fallback.
fn manifest_dir_matches(manifest_path: &Utf8Path, dir: &Utf8Path) -> bool {
    let Some(parent) = manifest_path.parent() else {
        return false;
    };
    if dir.is_absolute() {
        return parent == dir;
    }
    let rel: Vec<_> = dir
        .components()
        .filter(|c| !matches!(c, camino::Utf8Component::CurDir))
        .collect();
    if rel.is_empty() {
        return false;
    }
    parent.ends_with(Utf8PathBuf::from_iter(rel))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Realistic `cargo metadata --no-deps` output for tests.

    use serde_json::json;

    /// A target entry with the given kind.
    fn target(name: &str, kind: &str, src: &str) -> serde_json::Value {
        json!({
            "name": name,
            "kind": [kind],
            "crate_types": ["bin"],
            "required-features": [],
            "src_path": src,
            "edition": "2021",
            "doctest": false,
            "test": true,
            "doc": false
        })
    }

    /// One package entry rooted at `/work/<dir>`.
    pub fn package(dir: &str, name: &str, version: &str, examples: &[&str]) -> serde_json::Value {
        let root = format!("/work/{dir}");
        let mut targets = vec![json!({
            "name": name,
            "kind": ["lib"],
            "crate_types": ["lib"],
            "required-features": [],
            "src_path": format!("{root}/src/lib.rs"),
            "edition": "2021",
            "doctest": true,
            "test": true,
            "doc": true
        })];
        for ex in examples {
            targets.push(target(ex, "example", &format!("{root}/examples/{ex}.rs")));
        }
        json!({
            "name": name,
            "version": version,
            "id": format!("path+file://{root}#{name}@{version}"),
            "license": "LGPL-3.0",
            "license_file": null,
            "description": null,
            "source": null,
            "dependencies": [],
            "targets": targets,
            "features": {},
            "manifest_path": format!("{root}/Cargo.toml"),
            "metadata": null,
            "publish": null,
            "authors": [],
            "categories": [],
            "keywords": [],
            "readme": null,
            "repository": null,
            "homepage": null,
            "documentation": null,
            "edition": "2021",
            "links": null,
            "default_run": null,
            "rust_version": null
        })
    }

    /// A complete metadata document containing `packages`.
    pub fn metadata(packages: Vec<serde_json::Value>) -> String {
        let members: Vec<_> = packages.iter().map(|p| p["id"].clone()).collect();
        json!({
            "packages": packages,
            "workspace_members": members.clone(),
            "workspace_default_members": members,
            "resolve": null,
            "target_directory": "/work/target",
            "version": 1,
            "workspace_root": "/work",
            "metadata": null
        })
        .to_string()
    }

    /// Metadata for a single package.
    pub fn single(dir: &str, name: &str, version: &str, examples: &[&str]) -> String {
        metadata(vec![package(dir, name, version, examples)])
    }
}
