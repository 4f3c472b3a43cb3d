//! Publishing with skip-if-published and linear retry.
//!
//! Each package is resolved through `cargo metadata`, compared against the
//! registry with `cargo search <name> --limit 1`, and published only when the
//! registry does not already carry the local version. A failed `cargo publish`
//! is retried after `base_delay + i * delay_step` (zero-based attempt index
//! `i`) until the attempt budget runs out.

use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8Path;
use regex::Regex;
use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::PublishConfig;
use crate::package::{self, PackageError};
use crate::toolchain::{Action, Invocation, Toolchain, ToolchainError, run_checked};

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors from the publish stage.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The package could not be resolved.
    #[error(transparent)]
    Package(#[from] PackageError),

    /// The registry search failed.
    #[error("registry search failed: {0}")]
    Search(#[source] ToolchainError),

    /// Every publish attempt failed.
    #[error("failed to publish {package} after {attempts} attempt(s): {last_error}")]
    Exhausted {
        /// Crate name.
        package: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error reported by the final attempt.
        last_error: String,
    },
}

/// Result alias for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

// ──────────────────────────────────────────────
// Retry policy
// ──────────────────────────────────────────────

/// How many times to try `cargo publish` and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (at least one is always made).
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Added to the delay for each subsequent failure.
    pub delay_step: Duration,
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay + self.delay_step.saturating_mul(attempt)
    }

    /// Override the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    const fn budget(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

impl From<&PublishConfig> for RetryPolicy {
    fn from(config: &PublishConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            delay_step: config.delay_step,
        }
    }
}

// ──────────────────────────────────────────────
// Reports
// ──────────────────────────────────────────────

/// Outcome of a single `cargo publish` attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AttemptOutcome {
    /// The crate was uploaded.
    Published,
    /// The attempt failed.
    Failed {
        /// Error text (trimmed stderr or spawn error).
        error: String,
        /// Delay before the next attempt, if any.
        #[serde(with = "humantime_serde")]
        retry_in: Option<Duration>,
    },
}

/// One publish attempt of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishAttempt {
    /// Crate name.
    pub package: String,
    /// One-based attempt number.
    pub attempt: u32,
    /// What happened.
    pub outcome: AttemptOutcome,
}

/// What the publish stage decided for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum PublishDecision {
    /// The registry already has this version.
    AlreadyPublished,
    /// The package was published.
    Published {
        /// Attempts it took, including failures.
        attempts: Vec<PublishAttempt>,
    },
    /// Dry run: the package would have been published.
    WouldPublish {
        /// Version currently on the registry, if any.
        remote: Option<Version>,
    },
}

/// Publish result for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Crate name.
    pub package: String,
    /// Local version.
    pub version: Version,
    /// What happened.
    pub decision: PublishDecision,
}

// ──────────────────────────────────────────────
// Registry search
// ──────────────────────────────────────────────

static SEARCH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\S+) = "([^"]+)""#).expect("search pattern is valid")
});

/// Extract the registry version of `name` from `cargo search` output.
///
/// Only the first line is considered. A different crate name (search is
/// fuzzy) or an unparseable version means "not published".
pub fn parse_search(stdout: &str, name: &str) -> Option<Version> {
    let first = stdout.lines().next()?;
    let caps = SEARCH_LINE.captures(first)?;
    if &caps[1] != name {
        return None;
    }
    Version::parse(&caps[2]).ok()
}

/// Query the registry for the published version of `name`.
pub fn remote_version(
    toolchain: &dyn Toolchain,
    dir: &Utf8Path,
    name: &str,
) -> PublishResult<Option<Version>> {
    let invocation = Invocation::new(dir, Action::Search).args([name, "--limit", "1"]);
    let output = run_checked(toolchain, &invocation).map_err(PublishError::Search)?;
    Ok(parse_search(&output.stdout, name))
}

// ──────────────────────────────────────────────
// Publisher
// ──────────────────────────────────────────────

/// Publishes packages according to a [`RetryPolicy`].
pub struct Publisher<'a> {
    toolchain: &'a dyn Toolchain,
    policy: RetryPolicy,
    verbose: bool,
    dry_run: bool,
}

impl<'a> Publisher<'a> {
    /// Create a publisher.
    pub fn new(toolchain: &'a dyn Toolchain, policy: RetryPolicy) -> Self {
        Self {
            toolchain,
            policy,
            verbose: false,
            dry_run: false,
        }
    }

    /// Pass `--verbose` to `cargo publish`.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Stop after the registry comparison.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Publish the package in `dir`.
    ///
    /// `sleep` is called between failed attempts with the backoff delay;
    /// `on_attempt` sees every attempt as it finishes.
    #[instrument(skip(self, sleep, on_attempt), fields(%dir))]
    pub fn publish(
        &self,
        dir: &Utf8Path,
        sleep: &mut dyn FnMut(Duration),
        on_attempt: &mut dyn FnMut(&PublishAttempt),
    ) -> PublishResult<PublishReport> {
        let pkg = package::resolve(self.toolchain, dir)?;
        let remote = remote_version(self.toolchain, dir, &pkg.name)?;
        debug!(name = %pkg.name, local = %pkg.version, remote = ?remote, "compared with registry");

        if remote.as_ref() == Some(&pkg.version) {
            info!(name = %pkg.name, version = %pkg.version, "already published, skipping");
            return Ok(PublishReport {
                package: pkg.name,
                version: pkg.version,
                decision: PublishDecision::AlreadyPublished,
            });
        }

        if self.dry_run {
            return Ok(PublishReport {
                package: pkg.name,
                version: pkg.version,
                decision: PublishDecision::WouldPublish { remote },
            });
        }

        let attempts = self.publish_with_retry(dir, &pkg.name, sleep, on_attempt)?;
        info!(name = %pkg.name, version = %pkg.version, attempts = attempts.len(), "published");
        Ok(PublishReport {
            package: pkg.name,
            version: pkg.version,
            decision: PublishDecision::Published { attempts },
        })
    }

    fn publish_with_retry(
        &self,
        dir: &Utf8Path,
        name: &str,
        sleep: &mut dyn FnMut(Duration),
        on_attempt: &mut dyn FnMut(&PublishAttempt),
    ) -> PublishResult<Vec<PublishAttempt>> {
        let budget = self.policy.budget();
        let invocation = Invocation::new(dir, Action::Publish).verbose(self.verbose);
        let mut attempts = Vec::new();
        let mut last_error = String::new();

        for index in 0..budget {
            let number = index + 1;
            let outcome = match run_checked(self.toolchain, &invocation) {
                Ok(_) => AttemptOutcome::Published,
                Err(e) => {
                    last_error = e.to_string();
                    let retry_in = (number < budget).then(|| self.policy.delay(index));
                    warn!(
                        package = name,
                        attempt = number,
                        of = budget,
                        error = %last_error,
                        "publish attempt failed"
                    );
                    AttemptOutcome::Failed {
                        error: last_error.clone(),
                        retry_in,
                    }
                }
            };

            let attempt = PublishAttempt {
                package: name.to_string(),
                attempt: number,
                outcome,
            };
            on_attempt(&attempt);

            let next = match &attempt.outcome {
                AttemptOutcome::Published => None,
                AttemptOutcome::Failed { retry_in, .. } => Some(*retry_in),
            };
            attempts.push(attempt);

            match next {
                None => return Ok(attempts),
                Some(Some(delay)) => sleep(delay),
                Some(None) => {}
            }
        }

        Err(PublishError::Exhausted {
            package: name.to_string(),
            attempts: budget,
            last_error,
        })
    }
}
