//! Documentation build and post-processing.
//!
//! The doc package is a placeholder crate that depends on every documented
//! crate so a single `cargo doc` covers the whole workspace. Its own entry
//! (the sentinel) is then scrubbed from the generated index artifacts, and
//! the maintained stylesheets replace the generated ones.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::DocsConfig;
use crate::toolchain::{Action, Invocation, Toolchain, ToolchainError, run_checked};

/// Errors from the documentation stage.
#[derive(Error, Debug)]
pub enum DocError {
    /// `cargo doc` failed.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// A generated index did not mention the sentinel crate.
    #[error("no `[\"{sentinel}\"]` entry found in {path}")]
    SentinelNotFound {
        /// Index artifact that was scanned.
        path: Utf8PathBuf,
        /// The sentinel crate name.
        sentinel: String,
    },

    /// A maintained stylesheet does not exist.
    #[error("stylesheet {path} does not exist")]
    MissingStylesheet {
        /// Expected source path.
        path: Utf8PathBuf,
    },

    /// Filesystem error while post-processing.
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

/// Result alias for documentation operations.
pub type DocResult<T> = Result<T, DocError>;

fn io_err<'a>(
    action: &'static str,
    path: &'a Utf8Path,
) -> impl FnOnce(io::Error) -> DocError + 'a {
    move |source| DocError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Text with sentinel lines removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripped {
    /// Remaining text.
    pub text: String,
    /// Number of removed lines.
    pub removed: usize,
}

/// Drop every line that contains `["<sentinel>"]`.
///
/// Every other line, including its terminator, is kept verbatim.
pub fn strip_sentinel(text: &str, sentinel: &str) -> Stripped {
    let needle = format!("[\"{sentinel}\"]");
    let mut out = String::with_capacity(text.len());
    let mut removed = 0;
    for line in text.split_inclusive('\n') {
        if line.contains(&needle) {
            removed += 1;
        } else {
            out.push_str(line);
        }
    }
    Stripped { text: out, removed }
}

/// Summary of a documentation build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocReport {
    /// Output directory that was regenerated.
    pub output_dir: Utf8PathBuf,
    /// Scrubbed index artifacts and the number of lines removed from each.
    pub scrubbed: Vec<(Utf8PathBuf, usize)>,
    /// Stylesheets removed before the maintained ones were copied in.
    pub pruned: Vec<Utf8PathBuf>,
    /// Stylesheets written into the output directory.
    pub stylesheets: Vec<Utf8PathBuf>,
}

/// Build and post-process the documentation of `doc_package`.
#[instrument(skip(toolchain, config), fields(%doc_package))]
pub fn build_docs(
    toolchain: &dyn Toolchain,
    doc_package: &Utf8Path,
    config: &DocsConfig,
    verbose: bool,
) -> DocResult<DocReport> {
    let output_dir = doc_package.join(&config.output_dir);
    remove_output(&output_dir)?;

    run_checked(toolchain, &Invocation::new(doc_package, Action::Doc).verbose(verbose))?;
    info!(%output_dir, "generated documentation");

    let mut report = DocReport {
        output_dir: output_dir.clone(),
        ..DocReport::default()
    };

    for name in &config.index_files {
        let path = output_dir.join(name);
        let removed = scrub_index(&path, &config.sentinel)?;
        report.scrubbed.push((path, removed));
    }

    if config.prune_stylesheets {
        report.pruned = prune_stylesheets(&output_dir)?;
    }

    for sheet in &config.stylesheets {
        report
            .stylesheets
            .push(install_stylesheet(doc_package, &output_dir, sheet)?);
    }

    Ok(report)
}

/// Remove a previous documentation build; an absent directory is fine.
fn remove_output(dir: &Utf8Path) -> DocResult<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!(%dir, "removed previous output");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_err("failed to remove", dir)(source)),
    }
}

/// Strip sentinel lines from the artifact at `path` in place.
fn scrub_index(path: &Utf8Path, sentinel: &str) -> DocResult<usize> {
    let text = std::fs::read_to_string(path).map_err(io_err("failed to read", path))?;
    let stripped = strip_sentinel(&text, sentinel);
    if stripped.removed == 0 {
        return Err(DocError::SentinelNotFound {
            path: path.to_path_buf(),
            sentinel: sentinel.to_string(),
        });
    }
    std::fs::write(path, stripped.text).map_err(io_err("failed to write", path))?;
    debug!(%path, removed = stripped.removed, "scrubbed index");
    Ok(stripped.removed)
}

/// Delete every `*.css` directly inside `dir`, returning what was removed.
fn prune_stylesheets(dir: &Utf8Path) -> DocResult<Vec<Utf8PathBuf>> {
    let mut pruned = Vec::new();
    for entry in dir.read_dir_utf8().map_err(io_err("failed to list", dir))? {
        let entry = entry.map_err(io_err("failed to list", dir))?;
        let path = entry.path();
        if path.extension() == Some("css") && path.is_file() {
            std::fs::remove_file(path).map_err(io_err("failed to remove", path))?;
            pruned.push(path.to_path_buf());
        }
    }
    pruned.sort();
    Ok(pruned)
}

/// Copy `doc_package/sheet` to `output_dir/<file name>`, overwriting.
fn install_stylesheet(
    doc_package: &Utf8Path,
    output_dir: &Utf8Path,
    sheet: &Utf8Path,
) -> DocResult<Utf8PathBuf> {
    let source = doc_package.join(sheet);
    if !source.is_file() {
        return Err(DocError::MissingStylesheet { path: source });
    }
    let target = output_dir.join(sheet.file_name().unwrap_or(sheet.as_str()));
    std::fs::copy(&source, &target).map_err(io_err("failed to copy", &source))?;
    debug!(%source, %target, "installed stylesheet");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::toolchain::ToolOutput;
    use crate::toolchain::testing::StubToolchain;

    const SEARCH_INDEX: &str = "var searchIndex = {};\n\
searchIndex[\"delete_me\"] = {\"doc\":\"\",\"items\":[]};\n\
searchIndex[\"gnuplot\"] = {\"doc\":\"A gnuplot controller\",\"items\":[]};\n\
initSearch(searchIndex);\n";

    #[test]
    fn strips_only_sentinel_lines() {
        let stripped = strip_sentinel(SEARCH_INDEX, "delete_me");
        assert_eq!(stripped.removed, 1);
        assert_eq!(stripped.text.lines().count(), 3);
        assert!(!stripped.text.contains("delete_me"));
        assert!(stripped.text.contains("searchIndex[\"gnuplot\"]"));
    }

    #[test]
    fn strip_without_sentinel_removes_nothing() {
        let stripped = strip_sentinel("var searchIndex = {};\n", "delete_me");
        assert_eq!(stripped.removed, 0);
        assert_eq!(stripped.text, "var searchIndex = {};\n");
    }

    #[test]
    fn sentinel_must_be_bracketed() {
        let text = "// delete_me is the anchor crate\n";
        assert_eq!(strip_sentinel(text, "delete_me").removed, 0);
    }

    /// A doc package whose `cargo doc` stub writes a realistic output tree.
    fn doc_package(with_sentinel: bool) -> (TempDir, Utf8PathBuf, StubToolchain) {
        let tmp = TempDir::new().unwrap();
        let pkg = Utf8PathBuf::try_from(tmp.path().join("doc")).unwrap();
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("main.css"), "body { color: black; }\n").unwrap();

        let out = pkg.join("target/doc");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.html"), "old").unwrap();

        let stub = StubToolchain::with(move |inv| {
            if inv.action == Action::Doc {
                let out = inv.dir.join("target/doc");
                fs::create_dir_all(&out).unwrap();
                let index = if with_sentinel {
                    SEARCH_INDEX.to_string()
                } else {
                    "var searchIndex = {};\n".to_string()
                };
                fs::write(out.join("search-index.js"), &index).unwrap();
                fs::write(out.join("source-files.js"), "sourcesIndex[\"delete_me\"] = {};\n")
                    .unwrap();
                fs::write(out.join("main.css"), "/* generated */").unwrap();
                fs::write(out.join("rustdoc.css"), "/* generated */").unwrap();
            }
            ToolOutput::ok("")
        });
        (tmp, pkg, stub)
    }

    #[test]
    fn build_docs_scrubs_and_replaces_styles() {
        let (_tmp, pkg, stub) = doc_package(true);
        let report = build_docs(&stub, &pkg, &DocsConfig::default(), false).unwrap();

        let out = pkg.join("target/doc");
        assert!(!out.join("stale.html").exists(), "output dir was not cleared");

        let index = fs::read_to_string(out.join("search-index.js")).unwrap();
        assert!(!index.contains("delete_me"));
        assert!(index.contains("gnuplot"));
        assert_eq!(report.scrubbed.len(), 2);

        assert_eq!(
            fs::read_to_string(out.join("main.css")).unwrap(),
            "body { color: black; }\n"
        );
        assert!(!out.join("rustdoc.css").exists());
        assert_eq!(report.pruned.len(), 2);
        assert_eq!(report.stylesheets, vec![out.join("main.css")]);
        assert_eq!(stub.calls_for(Action::Doc).len(), 1);
    }

    #[test]
    fn keeps_generated_styles_without_pruning() {
        let (_tmp, pkg, stub) = doc_package(true);
        let config = DocsConfig {
            prune_stylesheets: false,
            ..DocsConfig::default()
        };
        build_docs(&stub, &pkg, &config, false).unwrap();
        assert!(pkg.join("target/doc/rustdoc.css").exists());
    }

    #[test]
    fn missing_sentinel_is_fatal() {
        let (_tmp, pkg, stub) = doc_package(false);
        let err = build_docs(&stub, &pkg, &DocsConfig::default(), false).unwrap_err();
        match err {
            DocError::SentinelNotFound { path, sentinel } => {
                assert!(path.ends_with("search-index.js"));
                assert_eq!(sentinel, "delete_me");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_stylesheet_is_fatal() {
        let (_tmp, pkg, stub) = doc_package(true);
        fs::remove_file(pkg.join("main.css")).unwrap();
        assert!(matches!(
            build_docs(&stub, &pkg, &DocsConfig::default(), false),
            Err(DocError::MissingStylesheet { .. })
        ));
    }

    #[test]
    fn unreadable_index_names_the_file() {
        let (_tmp, pkg, stub) = doc_package(true);
        let config = DocsConfig {
            index_files: vec!["search-index.js".into(), "crates.js".into()],
            ..DocsConfig::default()
        };
        match build_docs(&stub, &pkg, &config, false) {
            Err(DocError::Io { action, path, .. }) => {
                assert_eq!(action, "failed to read");
                assert_eq!(path, pkg.join("target/doc/crates.js"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn absent_output_dir_is_tolerated() {
        let (_tmp, pkg, stub) = doc_package(true);
        fs::remove_dir_all(pkg.join("target")).unwrap();
        assert!(build_docs(&stub, &pkg, &DocsConfig::default(), false).is_ok());
    }

    #[test]
    fn failed_cargo_doc_stops_before_post_processing() {
        let tmp = TempDir::new().unwrap();
        let pkg = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let stub = StubToolchain::with(|_| ToolOutput::failed(101, "unresolved import"));
        assert!(matches!(
            build_docs(&stub, &pkg, &DocsConfig::default(), false),
            Err(DocError::Toolchain(_))
        ));
    }
}
