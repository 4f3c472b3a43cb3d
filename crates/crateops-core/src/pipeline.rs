//! Stage driver: runs the selected stages in their fixed order.
//!
//! # Two-step workflow
//!
//! 1. **Plan** ([`Plan::new`]): validate the options against the loaded
//!    configuration and work out which stages run.
//! 2. **Execute** ([`Plan::execute`]): run every stage over the configured
//!    packages, reporting progress through [`RunEvent`] callbacks and halting
//!    on the first fatal error.
//!
//! Stage order never depends on flag order:
//! version → publish → build → format → test → test outputs → clean → doc.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::clean::{self, CleanError};
use crate::config::Config;
use crate::docs::{self, DocError, DocReport};
use crate::golden::{self, GoldenError, GoldenReport};
use crate::manifest::{self, MANIFEST_FILE, ManifestError};
use crate::publish::{
    PublishAttempt, PublishDecision, PublishError, PublishReport, Publisher, RetryPolicy,
};
use crate::runner::Runner;
use crate::toolchain::{Toolchain, ToolchainError};

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors from a pipeline run.
#[derive(Error, Debug)]
pub enum RunError {
    /// No stage was selected.
    #[error("nothing to do: select at least one stage")]
    NothingToDo,

    /// The requested version is invalid.
    #[error(transparent)]
    InvalidVersion(ManifestError),

    /// A stage failed; later stages did not run.
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        /// The failing stage.
        stage: Stage,
        /// What went wrong.
        #[source]
        source: StageError,
    },
}

/// The error behind a failed stage.
#[derive(Error, Debug)]
pub enum StageError {
    /// Version stamping failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// A cargo invocation failed.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    /// Cleaning failed.
    #[error(transparent)]
    Clean(#[from] CleanError),

    /// The documentation build failed.
    #[error(transparent)]
    Doc(#[from] DocError),

    /// The golden-image test failed.
    #[error(transparent)]
    Golden(#[from] GoldenError),
}

/// Result alias for pipeline runs.
pub type RunResult<T> = Result<T, RunError>;

// ──────────────────────────────────────────────
// Stages and options
// ──────────────────────────────────────────────

/// Pipeline stages, declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stamp the `#auto` version markers.
    Version,
    /// Publish to the registry.
    Publish,
    /// `cargo build`.
    Build,
    /// `cargo fmt`.
    Format,
    /// Format check and `cargo test`.
    Test,
    /// Golden-image regression test.
    TestOutputs,
    /// Remove lockfiles and build artifacts.
    Clean,
    /// Build and post-process documentation.
    Doc,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Self; 8] = [
        Self::Version,
        Self::Publish,
        Self::Build,
        Self::Format,
        Self::Test,
        Self::TestOutputs,
        Self::Clean,
        Self::Doc,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Version => write!(f, "version"),
            Self::Publish => write!(f, "publish"),
            Self::Build => write!(f, "build"),
            Self::Format => write!(f, "format"),
            Self::Test => write!(f, "test"),
            Self::TestOutputs => write!(f, "test-outputs"),
            Self::Clean => write!(f, "clean"),
            Self::Doc => write!(f, "doc"),
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stamp this version into every managed manifest.
    pub set_version: Option<String>,
    /// Run the publish stage.
    pub publish: bool,
    /// Run the build stage.
    pub build: bool,
    /// Run the format stage.
    pub format: bool,
    /// Run the test stage.
    pub test: bool,
    /// Run the golden-image stage.
    pub test_outputs: bool,
    /// Run the clean stage.
    pub clean: bool,
    /// Run the doc stage.
    pub doc: bool,
    /// Override `publish.max_attempts`.
    pub retries: Option<u32>,
    /// Pass `--verbose` to cargo.
    pub verbose: bool,
    /// Report what would happen without side effects.
    pub dry_run: bool,
}

impl RunOptions {
    /// Whether `stage` was requested.
    pub const fn wants(&self, stage: Stage) -> bool {
        match stage {
            Stage::Version => self.set_version.is_some(),
            Stage::Publish => self.publish,
            Stage::Build => self.build,
            Stage::Format => self.format,
            Stage::Test => self.test,
            Stage::TestOutputs => self.test_outputs,
            Stage::Clean => self.clean,
            Stage::Doc => self.doc,
        }
    }
}

// ──────────────────────────────────────────────
// Events and outcomes
// ──────────────────────────────────────────────

/// Progress events emitted while a plan executes.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A stage has started.
    StageStarted(Stage),
    /// A stage has completed.
    StageCompleted(Stage, StageOutcome),
    /// A stage moved on to the next package.
    PackageStarted {
        /// Current stage.
        stage: Stage,
        /// Package directory as configured.
        package: Utf8PathBuf,
    },
    /// A publish attempt finished.
    PublishAttempt(PublishAttempt),
    /// An example is about to be rendered.
    ExampleStarted(String),
}

/// Outcome of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageOutcome {
    /// Stage completed successfully.
    Success {
        /// Description of what happened.
        message: String,
    },
    /// Dry run: what the stage would do.
    Planned {
        /// One line per side effect.
        actions: Vec<String>,
    },
}

/// Outcome of a full run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    /// The stamped version, if the version stage ran.
    pub version: Option<Version>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Results of each stage, in order.
    pub stages: Vec<(Stage, StageOutcome)>,
    /// Per-package publish results.
    pub published: Vec<PublishReport>,
    /// Golden-image results, if that stage ran.
    pub golden: Option<GoldenReport>,
    /// Documentation results, if that stage ran.
    pub docs: Option<DocReport>,
}

// ──────────────────────────────────────────────
// Plan
// ──────────────────────────────────────────────

/// A validated run, ready to execute.
#[derive(Debug, Clone)]
pub struct Plan {
    root: Utf8PathBuf,
    config: Config,
    options: RunOptions,
    version: Option<Version>,
    stages: Vec<Stage>,
}

impl Plan {
    /// Validate `options` against `config`.
    ///
    /// Package directories in `config` are resolved against `root`.
    pub fn new(
        root: impl Into<Utf8PathBuf>,
        config: Config,
        options: RunOptions,
    ) -> RunResult<Self> {
        let stages: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| options.wants(*s))
            .collect();
        if stages.is_empty() {
            return Err(RunError::NothingToDo);
        }
        let version = options
            .set_version
            .as_deref()
            .map(manifest::parse_version)
            .transpose()
            .map_err(RunError::InvalidVersion)?;

        Ok(Self {
            root: root.into(),
            config,
            options,
            version,
            stages,
        })
    }

    /// Selected stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The version to stamp, if any.
    pub const fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Options this plan was built from.
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    fn dir(&self, package: &Utf8Path) -> Utf8PathBuf {
        self.root.join(package)
    }

    fn package_dirs(&self) -> Vec<Utf8PathBuf> {
        self.config.packages.iter().map(|p| self.dir(p)).collect()
    }

    /// Doc package first, then the configured packages.
    fn doc_and_packages(&self) -> Vec<Utf8PathBuf> {
        std::iter::once(&self.config.doc_package)
            .chain(&self.config.packages)
            .map(|p| self.dir(p))
            .collect()
    }

    fn relative<'p>(&self, dir: &'p Utf8Path) -> &'p Utf8Path {
        dir.strip_prefix(&self.root).unwrap_or(dir)
    }

    fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::from(&self.config.publish);
        match self.options.retries {
            Some(n) => policy.with_max_attempts(n),
            None => policy,
        }
    }

    /// Side effects `stage` would have, for dry runs.
    pub fn describe(&self, stage: Stage) -> Vec<String> {
        let cfg = &self.config;
        let each = |dirs: &[Utf8PathBuf], what: &str| -> Vec<String> {
            dirs.iter()
                .map(|d| format!("{what} in {}", self.relative(d)))
                .collect()
        };
        match stage {
            Stage::Version => {
                let version = self
                    .version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.doc_and_packages()
                    .iter()
                    .map(|d| {
                        let manifest = d.join(MANIFEST_FILE);
                        format!("stamp {version} into {}", self.relative(&manifest))
                    })
                    .collect()
            }
            Stage::Publish => each(&self.package_dirs(), "cargo publish"),
            Stage::Build => each(&self.package_dirs(), "cargo build"),
            Stage::Format => each(&self.package_dirs(), "cargo fmt"),
            Stage::Test => {
                let dirs: Vec<_> = self
                    .package_dirs()
                    .into_iter()
                    .filter(|d| !self.is_examples_package(d))
                    .collect();
                each(&dirs, "cargo fmt -- --check && cargo test")
            }
            Stage::TestOutputs => vec![
                format!(
                    "run examples of {} into {}",
                    cfg.golden.package, cfg.golden.output_dir
                ),
                format!(
                    "compare with {} (tolerance {})",
                    cfg.golden.golden_dir, cfg.golden.tolerance
                ),
            ],
            Stage::Clean => each(&self.doc_and_packages(), "remove Cargo.lock and cargo clean"),
            Stage::Doc => {
                let out = cfg.doc_package.join(&cfg.docs.output_dir);
                let mut actions = vec![
                    format!("remove {out}"),
                    format!("cargo doc in {}", cfg.doc_package),
                ];
                actions.extend(
                    cfg.docs
                        .index_files
                        .iter()
                        .map(|f| format!("strip [\"{}\"] from {out}/{f}", cfg.docs.sentinel)),
                );
                if cfg.docs.prune_stylesheets {
                    actions.push(format!("remove {out}/*.css"));
                }
                actions.extend(
                    cfg.docs
                        .stylesheets
                        .iter()
                        .map(|s| format!("copy {}/{s} into {out}", cfg.doc_package)),
                );
                actions
            }
        }
    }

    fn is_examples_package(&self, dir: &Utf8Path) -> bool {
        self.config
            .examples_package
            .as_deref()
            .is_some_and(|ex| crate::runner::same_dir(&self.dir(ex), dir))
    }

    /// Execute the plan, sleeping for real between publish retries.
    pub fn execute(
        &self,
        toolchain: &dyn Toolchain,
        on_event: impl FnMut(RunEvent),
    ) -> RunResult<RunOutcome> {
        let mut sleep = std::thread::sleep;
        self.execute_with(toolchain, &mut sleep, on_event)
    }

    /// Execute the plan with an explicit sleep function.
    ///
    /// Calls `on_event` at stage and package boundaries so the CLI can
    /// update its progress display.
    #[instrument(skip_all, fields(
        root = %self.root,
        stages = self.stages.len(),
        dry_run = self.options.dry_run
    ))]
    pub fn execute_with(
        &self,
        toolchain: &dyn Toolchain,
        sleep: &mut dyn FnMut(Duration),
        mut on_event: impl FnMut(RunEvent),
    ) -> RunResult<RunOutcome> {
        let mut outcome = RunOutcome {
            version: self.version.clone(),
            dry_run: self.options.dry_run,
            ..RunOutcome::default()
        };

        for &stage in &self.stages {
            on_event(RunEvent::StageStarted(stage));
            let result = if self.options.dry_run && stage != Stage::Publish {
                Ok(StageOutcome::Planned {
                    actions: self.describe(stage),
                })
            } else {
                self.run_stage(stage, toolchain, sleep, &mut on_event, &mut outcome)
            };
            let stage_outcome = result.map_err(|source| RunError::StageFailed { stage, source })?;
            info!(%stage, "stage finished");
            on_event(RunEvent::StageCompleted(stage, stage_outcome.clone()));
            outcome.stages.push((stage, stage_outcome));
        }

        Ok(outcome)
    }

    fn run_stage(
        &self,
        stage: Stage,
        toolchain: &dyn Toolchain,
        sleep: &mut dyn FnMut(Duration),
        on_event: &mut dyn FnMut(RunEvent),
        outcome: &mut RunOutcome,
    ) -> Result<StageOutcome, StageError> {
        let verbose = self.options.verbose;
        let mut on_package = |dir: &Utf8Path| {
            on_event(RunEvent::PackageStarted {
                stage,
                package: self.relative(dir).to_path_buf(),
            });
        };

        let message = match stage {
            Stage::Version => {
                let Some(version) = &self.version else {
                    return Ok(success("no version requested"));
                };
                let mut lines = 0;
                let dirs = self.doc_and_packages();
                for dir in &dirs {
                    on_package(dir.as_path());
                    lines += manifest::stamp_manifest(&dir.join(MANIFEST_FILE), version)?;
                }
                format!("stamped {version} on {lines} line(s) in {} manifest(s)", dirs.len())
            }
            Stage::Publish => {
                let publisher = Publisher::new(toolchain, self.retry_policy())
                    .verbose(verbose)
                    .dry_run(self.options.dry_run);
                let mut reports = Vec::new();
                for dir in self.package_dirs() {
                    on_event(RunEvent::PackageStarted {
                        stage,
                        package: self.relative(&dir).to_path_buf(),
                    });
                    let report = publisher.publish(&dir, sleep, &mut |attempt| {
                        on_event(RunEvent::PublishAttempt(attempt.clone()));
                    })?;
                    reports.push(report);
                }
                let result = if self.options.dry_run {
                    StageOutcome::Planned {
                        actions: reports.iter().map(describe_publish).collect(),
                    }
                } else {
                    success(summarize_publish(&reports))
                };
                outcome.published = reports;
                return Ok(result);
            }
            Stage::Build => {
                let n = Runner::new(toolchain, verbose)
                    .build(&self.package_dirs(), &mut on_package)?;
                format!("built {n} package(s)")
            }
            Stage::Format => {
                let n = Runner::new(toolchain, verbose)
                    .format(&self.package_dirs(), &mut on_package)?;
                format!("formatted {n} package(s)")
            }
            Stage::Test => {
                let skip = self.config.examples_package.as_deref().map(|p| self.dir(p));
                let n = Runner::new(toolchain, verbose).test(
                    &self.package_dirs(),
                    skip.as_deref(),
                    &mut on_package,
                )?;
                format!("tested {n} package(s)")
            }
            Stage::TestOutputs => {
                let report = golden::test_outputs(
                    toolchain,
                    &self.root,
                    &self.config.golden,
                    &mut |ex| on_event(RunEvent::ExampleStarted(ex.to_string())),
                )?;
                let c = &report.comparison;
                let message = if c.mismatches.is_empty() {
                    format!("{} image(s) match golden outputs", c.compared)
                } else {
                    format!(
                        "{} of {} image(s) differ from golden outputs",
                        c.mismatches.len(),
                        c.compared
                    )
                };
                outcome.golden = Some(report);
                message
            }
            Stage::Clean => {
                let cleaned =
                    clean::clean(toolchain, &self.doc_and_packages(), verbose, &mut on_package)?;
                let locks = cleaned.iter().filter(|c| c.removed_lockfile).count();
                format!("cleaned {} package(s), removed {locks} lockfile(s)", cleaned.len())
            }
            Stage::Doc => {
                let doc_dir = self.dir(&self.config.doc_package);
                on_package(doc_dir.as_path());
                let report = docs::build_docs(toolchain, &doc_dir, &self.config.docs, verbose)?;
                let message = format!(
                    "documentation written to {}",
                    self.relative(&report.output_dir)
                );
                outcome.docs = Some(report);
                message
            }
        };

        Ok(success(message))
    }
}

fn success(message: impl Into<String>) -> StageOutcome {
    StageOutcome::Success {
        message: message.into(),
    }
}

fn describe_publish(report: &PublishReport) -> String {
    match &report.decision {
        PublishDecision::AlreadyPublished => {
            format!("skip {} {} (already published)", report.package, report.version)
        }
        PublishDecision::WouldPublish { remote: Some(remote) } => format!(
            "cargo publish {} {} (registry has {remote})",
            report.package, report.version
        ),
        PublishDecision::WouldPublish { remote: None } | PublishDecision::Published { .. } => {
            format!("cargo publish {} {}", report.package, report.version)
        }
    }
}

fn summarize_publish(reports: &[PublishReport]) -> String {
    let published = reports
        .iter()
        .filter(|r| matches!(r.decision, PublishDecision::Published { .. }))
        .count();
    let skipped = reports.len() - published;
    format!("published {published} package(s), {skipped} already up to date")
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::package::fixtures;
    use crate::toolchain::testing::StubToolchain;
    use crate::toolchain::{Action, ToolOutput};

    struct Workspace {
        _tmp: TempDir,
        root: Utf8PathBuf,
    }

    impl Workspace {
        /// `doc/` plus the named packages, each with a stamped manifest.
        fn new(packages: &[&str]) -> Self {
            let tmp = TempDir::new().unwrap();
            let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
            for pkg in std::iter::once(&"doc").chain(packages) {
                let dir = root.join(pkg);
                fs::create_dir_all(&dir).unwrap();
                fs::write(
                    dir.join(MANIFEST_FILE),
                    format!("[package]\nname = \"{pkg}\"\nversion = \"1.0.0\" #auto\n"),
                )
                .unwrap();
            }
            Self { _tmp: tmp, root }
        }

        fn manifest(&self, pkg: &str) -> String {
            fs::read_to_string(self.root.join(pkg).join(MANIFEST_FILE)).unwrap()
        }

        fn config(&self, packages: &[&str]) -> Config {
            Config {
                packages: packages.iter().map(Utf8PathBuf::from).collect(),
                ..Config::default()
            }
        }
    }

    fn collect_events(plan: &Plan, stub: &StubToolchain) -> (RunResult<RunOutcome>, Vec<String>) {
        let events = RefCell::new(Vec::new());
        let result = plan.execute_with(stub, &mut |_| {}, |e| {
            let label = match e {
                RunEvent::StageStarted(s) => format!("start {s}"),
                RunEvent::StageCompleted(s, _) => format!("done {s}"),
                RunEvent::PackageStarted { stage, package } => format!("{stage} {package}"),
                RunEvent::PublishAttempt(a) => format!("attempt {} {}", a.package, a.attempt),
                RunEvent::ExampleStarted(ex) => format!("example {ex}"),
            };
            events.borrow_mut().push(label);
        });
        (result, events.into_inner())
    }

    #[test]
    fn empty_selection_is_nothing_to_do() {
        assert!(matches!(
            Plan::new("/tmp", Config::default(), RunOptions::default()),
            Err(RunError::NothingToDo)
        ));
    }

    #[test]
    fn invalid_version_is_rejected_up_front() {
        let options = RunOptions {
            set_version: Some("next".into()),
            ..RunOptions::default()
        };
        assert!(matches!(
            Plan::new("/tmp", Config::default(), options),
            Err(RunError::InvalidVersion(_))
        ));
    }

    #[test]
    fn stages_follow_fixed_order() {
        let options = RunOptions {
            doc: true,
            test: true,
            build: true,
            set_version: Some("1.0.0".into()),
            clean: true,
            ..RunOptions::default()
        };
        let plan = Plan::new("/tmp", Config::default(), options).unwrap();
        assert_eq!(
            plan.stages(),
            &[Stage::Version, Stage::Build, Stage::Test, Stage::Clean, Stage::Doc]
        );
    }

    #[test]
    fn set_version_stamps_packages_and_doc() {
        let ws = Workspace::new(&["alpha"]);
        let options = RunOptions {
            set_version: Some("2.0.0".into()),
            ..RunOptions::default()
        };
        let plan = Plan::new(&ws.root, ws.config(&["alpha"]), options).unwrap();
        let stub = StubToolchain::succeeding();

        let (result, events) = collect_events(&plan, &stub);
        let outcome = result.unwrap();

        for pkg in ["alpha", "doc"] {
            let text = ws.manifest(pkg);
            assert!(text.contains("version = \"2.0.0\" #auto"), "{pkg}: {text}");
            assert!(!text.contains("1.0.0"));
        }
        assert_eq!(events, vec!["start version", "version doc", "version alpha", "done version"]);
        assert_eq!(outcome.version, Some(Version::new(2, 0, 0)));
        assert!(stub.calls.borrow().is_empty());
    }

    #[test]
    fn stages_run_in_order_over_packages() {
        let ws = Workspace::new(&["core", "examples"]);
        let options = RunOptions {
            test: true,
            build: true,
            clean: true,
            ..RunOptions::default()
        };
        let plan = Plan::new(&ws.root, ws.config(&["core", "examples"]), options).unwrap();
        let stub = StubToolchain::succeeding();
        collect_events(&plan, &stub).0.unwrap();

        let lines: Vec<String> = stub
            .command_lines()
            .into_iter()
            .map(|l| l.replace(&format!("{}/", ws.root), ""))
            .collect();
        assert_eq!(
            lines,
            vec![
                "core :: cargo build",
                "examples :: cargo build",
                "core :: cargo fmt -- --check",
                "core :: cargo test",
                "doc :: cargo clean",
                "core :: cargo clean",
                "examples :: cargo clean",
            ]
        );
    }

    #[test]
    fn failing_stage_halts_the_run() {
        let ws = Workspace::new(&["core"]);
        let options = RunOptions {
            build: true,
            test: true,
            ..RunOptions::default()
        };
        let plan = Plan::new(&ws.root, ws.config(&["core"]), options).unwrap();
        let stub = StubToolchain::with(|inv| {
            if inv.action == Action::Build {
                ToolOutput::failed(101, "could not compile `core`")
            } else {
                ToolOutput::ok("")
            }
        });

        let (result, events) = collect_events(&plan, &stub);
        match result.unwrap_err() {
            RunError::StageFailed { stage, source } => {
                assert_eq!(stage, Stage::Build);
                assert!(matches!(source, StageError::Toolchain(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(stub.calls_for(Action::Test).is_empty());
        assert!(!events.contains(&"done build".to_string()));
    }

    #[test]
    fn markerless_manifest_fails_version_stage() {
        let ws = Workspace::new(&["alpha"]);
        fs::write(ws.root.join("alpha").join(MANIFEST_FILE), "[package]\n").unwrap();
        let options = RunOptions {
            set_version: Some("2.0.0".into()),
            ..RunOptions::default()
        };
        let plan = Plan::new(&ws.root, ws.config(&["alpha"]), options).unwrap();
        assert!(matches!(
            collect_events(&plan, &StubToolchain::succeeding()).0,
            Err(RunError::StageFailed {
                stage: Stage::Version,
                source: StageError::Manifest(ManifestError::NoMarker { .. })
            })
        ));
    }

    #[test]
    fn publish_stage_reports_attempts_and_honours_retry_override() {
        let ws = Workspace::new(&["alpha"]);
        let mut config = ws.config(&["alpha"]);
        config.publish.base_delay = Duration::from_millis(10);
        let options = RunOptions {
            publish: true,
            retries: Some(2),
            ..RunOptions::default()
        };
        let plan = Plan::new(&ws.root, config, options).unwrap();
        let stub = StubToolchain::with(|inv| match inv.action {
            Action::Metadata => ToolOutput::ok(fixtures::single("alpha", "alpha", "1.0.0", &[])),
            Action::Search => ToolOutput::ok(""),
            Action::Publish => ToolOutput::failed(101, "registry unavailable"),
            _ => ToolOutput::ok(""),
        });

        let (result, events) = collect_events(&plan, &stub);
        assert!(matches!(
            result,
            Err(RunError::StageFailed {
                stage: Stage::Publish,
                source: StageError::Publish(PublishError::Exhausted { attempts: 2, .. })
            })
        ));
        assert_eq!(stub.calls_for(Action::Publish).len(), 2);
        assert!(events.contains(&"attempt alpha 2".to_string()));
    }

    #[test]
    fn dry_run_has_no_side_effects() {
        let ws = Workspace::new(&["alpha"]);
        let options = RunOptions {
            set_version: Some("2.0.0".into()),
            build: true,
            clean: true,
            doc: true,
            dry_run: true,
            ..RunOptions::default()
        };
        let plan = Plan::new(&ws.root, ws.config(&["alpha"]), options).unwrap();
        let stub = StubToolchain::succeeding();
        let outcome = collect_events(&plan, &stub).0.unwrap();

        assert!(stub.calls.borrow().is_empty());
        assert!(ws.manifest("alpha").contains("1.0.0"));
        assert!(outcome.dry_run);
        match &outcome.stages[0].1 {
            StageOutcome::Planned { actions } => {
                assert_eq!(
                    actions,
                    &vec![
                        "stamp 2.0.0 into doc/Cargo.toml".to_string(),
                        "stamp 2.0.0 into alpha/Cargo.toml".to_string(),
                    ]
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn dry_run_publish_queries_but_never_uploads() {
        let ws = Workspace::new(&["alpha"]);
        let options = RunOptions {
            publish: true,
            dry_run: true,
            ..RunOptions::default()
        };
        let plan = Plan::new(&ws.root, ws.config(&["alpha"]), options).unwrap();
        let stub = StubToolchain::with(|inv| match inv.action {
            Action::Metadata => ToolOutput::ok(fixtures::single("alpha", "alpha", "1.1.0", &[])),
            Action::Search => ToolOutput::ok("alpha = \"1.0.0\"    # the alpha crate\n"),
            _ => ToolOutput::ok(""),
        });
        let outcome = collect_events(&plan, &stub).0.unwrap();

        assert!(stub.calls_for(Action::Publish).is_empty());
        assert_eq!(
            outcome.stages[0].1,
            StageOutcome::Planned {
                actions: vec!["cargo publish alpha 1.1.0 (registry has 1.0.0)".into()]
            }
        );
    }

    #[test]
    fn outcome_serializes_for_json_output() {
        let outcome = RunOutcome {
            stages: vec![(
                Stage::TestOutputs,
                success("3 image(s) match golden outputs"),
            )],
            ..RunOutcome::default()
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stages"][0][0], "test_outputs");
        assert_eq!(json["stages"][0][1]["status"], "success");
    }
}
