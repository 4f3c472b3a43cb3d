//! Configuration loading and discovery.
//!
//! This module provides configuration file discovery by:
//! 1. Walking up from the current directory to find project config
//! 2. Loading user config from XDG config directory
//! 3. Merging with sensible defaults
//!
//! # Supported formats
//!
//! The following configuration file formats are supported:
//! - TOML (`.toml`)
//! - YAML (`.yaml`, `.yml`)
//! - JSON (`.json`)
//!
//! # Config file locations (in order of precedence, highest first):
//! - `.crateops.<ext>` in current directory or any parent
//! - `crateops.<ext>` in current directory or any parent
//! - `~/.config/crateops/config.<ext>` (user config)
//!
//! Where `<ext>` is one of: `toml`, `yaml`, `yml`, `json`
//!
//! # Example
//! ```no_run
//! use camino::Utf8PathBuf;
//! use crateops_core::config::{Config, ConfigLoader};
//!
//! let cwd = std::env::current_dir().unwrap();
//! let cwd = Utf8PathBuf::try_from(cwd).expect("current directory is not valid UTF-8");
//! let config = ConfigLoader::new()
//!     .with_project_search(&cwd)
//!     .load()
//!     .unwrap();
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// The configuration for crateops.
///
/// Deserialized from config files found during discovery (TOML, YAML, or JSON).
/// Every field has a default matching the conventional monorepo layout: one
/// package at the root, a `doc` anchor crate and an `examples` crate.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level for the application (e.g., "debug", "info", "warn", "error").
    pub log_level: LogLevel,
    /// Directory for JSONL log files (falls back to platform defaults if unset).
    pub log_dir: Option<Utf8PathBuf>,
    /// Package directories, relative to the project root, in processing order.
    pub packages: Vec<Utf8PathBuf>,
    /// The documentation anchor package (stamped, cleaned and documented).
    pub doc_package: Utf8PathBuf,
    /// Package directory excluded from the test stage.
    pub examples_package: Option<Utf8PathBuf>,
    /// Publish retry policy.
    pub publish: PublishConfig,
    /// Documentation post-processing.
    pub docs: DocsConfig,
    /// Golden-image regression test.
    pub golden: GoldenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_dir: None,
            packages: vec![Utf8PathBuf::from(".")],
            doc_package: Utf8PathBuf::from("doc"),
            examples_package: Some(Utf8PathBuf::from("examples")),
            publish: PublishConfig::default(),
            docs: DocsConfig::default(),
            golden: GoldenConfig::default(),
        }
    }
}

/// Publish retry policy.
///
/// The delay before retry `i` (zero-based) is `base_delay + i * delay_step`.
///
/// ```toml
/// [publish]
/// max_attempts = 5
/// base_delay = "5s"
/// delay_step = "1s"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Maximum number of `cargo publish` attempts per package.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Amount added to the delay for every further retry.
    #[serde(with = "humantime_serde")]
    pub delay_step: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            delay_step: Duration::from_secs(1),
        }
    }
}

/// Documentation build and post-processing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DocsConfig {
    /// Name of the placeholder crate whose index entries are stripped.
    pub sentinel: String,
    /// Generated index artifacts to scrub, relative to the output directory.
    pub index_files: Vec<String>,
    /// Maintained stylesheets, relative to the doc package, copied over the
    /// generated ones.
    pub stylesheets: Vec<Utf8PathBuf>,
    /// rustdoc output directory, relative to the doc package.
    pub output_dir: Utf8PathBuf,
    /// Delete every generated top-level `*.css` before copying the
    /// maintained stylesheets in.
    pub prune_stylesheets: bool,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            sentinel: "delete_me".into(),
            index_files: vec!["search-index.js".into(), "source-files.js".into()],
            stylesheets: vec![Utf8PathBuf::from("main.css")],
            output_dir: Utf8PathBuf::from("target/doc"),
            prune_stylesheets: true,
        }
    }
}

/// Golden-image regression test.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GoldenConfig {
    /// Package whose example targets render the images.
    pub package: Utf8PathBuf,
    /// Reference images, relative to the project root.
    pub golden_dir: Utf8PathBuf,
    /// Where examples write their images, relative to the project root.
    pub output_dir: Utf8PathBuf,
    /// Maximum absolute per-channel difference (out of 255).
    pub tolerance: u8,
    /// Example targets that are never run.
    pub exclude: Vec<String>,
    /// Fail the stage when any image mismatches (after comparing all of them).
    pub strict: bool,
}

impl Default for GoldenConfig {
    fn default() -> Self {
        Self {
            package: Utf8PathBuf::from("."),
            golden_dir: Utf8PathBuf::from("golden_outputs"),
            output_dir: Utf8PathBuf::from("test_outputs"),
            tolerance: 5,
            exclude: Vec::new(),
            strict: false,
        }
    }
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging and development.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors that indicate failures.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Supported configuration file extensions (in order of preference).
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Application name for XDG directory lookup and config file names.
const APP_NAME: &str = "crateops";

/// Builder for loading configuration from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Starting directory for project config search.
    project_search_root: Option<Utf8PathBuf>,
    /// Whether to include user config from XDG directory.
    include_user_config: bool,
    /// Stop searching when we hit a directory containing this file/dir.
    boundary_marker: Option<String>,
    /// Explicit config files to load (for testing or programmatic use).
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default settings.
    pub fn new() -> Self {
        Self {
            project_search_root: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Set the starting directory for project config search.
    ///
    /// The loader will walk up from this directory looking for config files.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.project_search_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set whether to include user config from `~/.config/crateops/`.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Set a boundary marker to stop directory traversal.
    ///
    /// When walking up directories, stop if we find a directory containing
    /// this file or directory name. Default is `.git`.
    pub fn with_boundary_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.boundary_marker = Some(marker.into());
        self
    }

    /// Disable boundary marker (search all the way to filesystem root).
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Add an explicit config file to load.
    ///
    /// Files are loaded in order, with later files taking precedence.
    /// Explicit files are loaded after discovered files.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration, merging all discovered sources.
    ///
    /// Precedence (highest to lowest):
    /// 1. Explicit files (in order added via `with_file`)
    /// 2. Project config (closest to search root)
    /// 3. User config (`~/.config/crateops/config.<ext>`)
    /// 4. Default values
    #[tracing::instrument(skip(self), fields(search_root = ?self.project_search_root))]
    pub fn load(self) -> ConfigResult<Config> {
        tracing::debug!("loading configuration");
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if self.include_user_config
            && let Some(user_config) = self.find_user_config()
        {
            figment = Self::merge_file(figment, &user_config);
        }

        if let Some(ref root) = self.project_search_root
            && let Some(project_config) = self.find_project_config(root)
        {
            figment = Self::merge_file(figment, &project_config);
        }

        for file in &self.explicit_files {
            figment = Self::merge_file(figment, file);
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            packages = config.packages.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration, returning an error if no config file is found.
    pub fn load_or_error(self) -> ConfigResult<Config> {
        let has_user = self.include_user_config && self.find_user_config().is_some();
        let has_project = self
            .project_search_root
            .as_ref()
            .and_then(|root| self.find_project_config(root))
            .is_some();
        let has_explicit = !self.explicit_files.is_empty();

        if !has_user && !has_project && !has_explicit {
            return Err(ConfigError::NotFound);
        }

        self.load()
    }

    /// Find project config by walking up from the given directory.
    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            for ext in CONFIG_EXTENSIONS {
                let dotfile = dir.join(format!(".{APP_NAME}.{ext}"));
                if dotfile.is_file() {
                    return Some(dotfile);
                }

                let regular = dir.join(format!("{APP_NAME}.{ext}"));
                if regular.is_file() {
                    return Some(regular);
                }
            }

            // The directory holding the marker is searched, its parents are not.
            if let Some(ref marker) = self.boundary_marker
                && dir.join(marker).exists()
            {
                break;
            }

            current = dir.parent().map(Utf8Path::to_path_buf);
        }

        None
    }

    /// Find user config in XDG config directory.
    fn find_user_config(&self) -> Option<Utf8PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
        let config_dir = proj_dirs.config_dir();

        for ext in CONFIG_EXTENSIONS {
            let config_path = config_dir.join(format!("config.{ext}"));
            if config_path.is_file() {
                return Utf8PathBuf::from_path_buf(config_path).ok();
            }
        }

        None
    }

    /// Merge a config file into the figment, detecting format from extension.
    fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
        match path.extension() {
            Some("toml") => figment.merge(Toml::file_exact(path.as_str())),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
            Some("json") => figment.merge(Json::file_exact(path.as_str())),
            _ => figment.merge(Toml::file_exact(path.as_str())),
        }
    }
}

/// Find the project config file [`ConfigLoader::load`] would use, without
/// loading it.
pub fn find_project_config<P: AsRef<Utf8Path>>(start: P) -> Option<Utf8PathBuf> {
    ConfigLoader::new().find_project_config(start.as_ref())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the user config directory path.
///
/// Returns `~/.config/crateops/` on Linux, `~/Library/Application Support/crateops/`
/// on macOS, and equivalent on other platforms.
pub fn user_config_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.config_dir().to_path_buf()).ok()
}

/// Get the user cache directory path.
pub fn user_cache_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.cache_dir().to_path_buf()).ok()
}

/// Get the local data directory path (machine-specific, not synced).
pub fn user_data_local_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.data_local_dir().to_path_buf()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn load_file(contents: &str) -> Config {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        fs::write(&config_path, contents).unwrap();
        let config_path = Utf8PathBuf::try_from(config_path).unwrap();
        ConfigLoader::new()
            .with_user_config(false)
            .with_file(&config_path)
            .load()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.log_dir.is_none());
        assert_eq!(config.packages, vec![Utf8PathBuf::from(".")]);
        assert_eq!(config.doc_package, "doc");
        assert_eq!(config.examples_package.as_deref(), Some(Utf8Path::new("examples")));
    }

    #[test]
    fn test_default_policies() {
        let config = Config::default();
        assert_eq!(config.publish.max_attempts, 5);
        assert_eq!(config.publish.base_delay, Duration::from_secs(5));
        assert_eq!(config.publish.delay_step, Duration::from_secs(1));
        assert_eq!(config.docs.sentinel, "delete_me");
        assert_eq!(
            config.docs.index_files,
            vec!["search-index.js", "source-files.js"]
        );
        assert_eq!(config.golden.tolerance, 5);
        assert!(!config.golden.strict);
    }

    #[test]
    fn test_loader_builds_with_defaults() {
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load()
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_single_file_overrides_default() {
        let config = load_file(
            r#"log_level = "debug"
log_dir = "/tmp/crateops"
packages = ["gnuplot", "examples"]
doc_package = "docs"
"#,
        );

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(
            config.log_dir.as_ref().map(|dir| dir.as_str()),
            Some("/tmp/crateops")
        );
        assert_eq!(
            config.packages,
            vec![Utf8PathBuf::from("gnuplot"), Utf8PathBuf::from("examples")]
        );
        assert_eq!(config.doc_package, "docs");
    }

    #[test]
    fn test_publish_section_parses_durations() {
        let config = load_file(
            r#"
[publish]
max_attempts = 3
base_delay = "2s"
delay_step = "500ms"
"#,
        );

        assert_eq!(config.publish.max_attempts, 3);
        assert_eq!(config.publish.base_delay, Duration::from_secs(2));
        assert_eq!(config.publish.delay_step, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = load_file(
            r#"
[publish]
max_attempts = 9
"#,
        );
        assert_eq!(config.publish.max_attempts, 9);
        assert_eq!(config.publish.base_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_docs_and_golden_sections() {
        let config = load_file(
            r#"
[docs]
sentinel = "anchor"
index_files = ["search-index.js"]
stylesheets = ["main.css", "rustdoc.css"]

[golden]
package = "gnuplot"
golden_dir = "golden"
output_dir = "out"
tolerance = 8
exclude = ["animation_example", "gif"]
strict = true
"#,
        );

        assert_eq!(config.docs.sentinel, "anchor");
        assert_eq!(config.docs.index_files, vec!["search-index.js"]);
        assert_eq!(config.docs.stylesheets.len(), 2);
        assert_eq!(config.docs.output_dir, "target/doc");
        assert_eq!(config.golden.package, "gnuplot");
        assert_eq!(config.golden.tolerance, 8);
        assert_eq!(config.golden.exclude, vec!["animation_example", "gif"]);
        assert!(config.golden.strict);
    }

    #[test]
    fn test_later_file_overrides_earlier() {
        let tmp = TempDir::new().unwrap();

        let base_config = tmp.path().join("base.toml");
        fs::write(&base_config, r#"log_level = "warn""#).unwrap();

        let override_config = tmp.path().join("override.toml");
        fs::write(&override_config, r#"log_level = "error""#).unwrap();

        let base_config = Utf8PathBuf::try_from(base_config).unwrap();
        let override_config = Utf8PathBuf::try_from(override_config).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&base_config)
            .with_file(&override_config)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn test_yaml_config() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.yaml");
        fs::write(
            &config_path,
            "packages:\n  - alpha\n  - beta\ngolden:\n  tolerance: 3\n",
        )
        .unwrap();
        let config_path = Utf8PathBuf::try_from(config_path).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&config_path)
            .load()
            .unwrap();

        assert_eq!(config.packages.len(), 2);
        assert_eq!(config.golden.tolerance, 3);
    }

    #[test]
    fn test_project_config_discovery() {
        let tmp = TempDir::new().unwrap();
        let project_dir = tmp.path().join("project");
        let sub_dir = project_dir.join("src").join("deep");
        fs::create_dir_all(&sub_dir).unwrap();

        fs::write(project_dir.join(".crateops.toml"), r#"log_level = "debug""#).unwrap();

        let sub_dir = Utf8PathBuf::try_from(sub_dir).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&sub_dir)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_boundary_marker_stops_search() {
        let tmp = TempDir::new().unwrap();

        let parent = tmp.path().join("parent");
        let child = parent.join("child");
        let work = child.join("work");
        fs::create_dir_all(&work).unwrap();

        fs::write(parent.join(".crateops.toml"), r#"log_level = "warn""#).unwrap();
        fs::create_dir(child.join(".git")).unwrap();

        let work = Utf8PathBuf::try_from(work).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_boundary_marker(".git")
            .with_project_search(&work)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_config_beside_marker_is_found() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        let src = repo.join("src");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(repo.join("crateops.yaml"), "log_level: debug\n").unwrap();

        let src = Utf8PathBuf::try_from(src).unwrap();
        let found = find_project_config(&src).unwrap();
        assert!(found.ends_with("repo/crateops.yaml"));

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(&src)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_explicit_file_overrides_project_config() {
        let tmp = TempDir::new().unwrap();

        fs::write(tmp.path().join(".crateops.toml"), r#"log_level = "warn""#).unwrap();

        let override_config = tmp.path().join("override.toml");
        fs::write(&override_config, r#"log_level = "error""#).unwrap();

        let tmp_path = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let override_config = Utf8PathBuf::try_from(override_config).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&tmp_path)
            .with_file(&override_config)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        fs::write(&config_path, "[publish]\nbase_delay = \"soon\"\n").unwrap();
        let config_path = Utf8PathBuf::try_from(config_path).unwrap();

        let result = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&config_path)
            .load();

        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn test_load_or_error_fails_when_no_config() {
        let result = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load_or_error();

        assert!(matches!(result, Err(ConfigError::NotFound)));
    }

    #[test]
    fn test_user_config_dir() {
        if let Some(path) = user_config_dir() {
            assert!(path.as_str().contains("crateops"));
        }
    }
}
