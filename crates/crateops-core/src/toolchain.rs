//! The narrow interface between crateops and `cargo`.
//!
//! Every external invocation (build, test, publish, clean, doc, metadata
//! queries, registry searches, example runs) goes through the [`Toolchain`]
//! trait. The production implementation, [`Cargo`], shells out to the
//! `cargo` binary and captures its output; tests substitute a stub that
//! records invocations and returns canned output.

use std::fmt;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors from toolchain invocations.
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// The toolchain binary could not be spawned.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The toolchain exited with a non-zero status.
    #[error(
        "`{command}` in {dir} exited with status {status}: {}",
        failure_detail(.stderr, .stdout_tail)
    )]
    Failed {
        /// The command line that failed.
        command: String,
        /// Working directory of the invocation.
        dir: Utf8PathBuf,
        /// Exit status (`-1` when terminated by a signal).
        status: i32,
        /// Captured stderr, trimmed.
        stderr: String,
        /// Last lines of captured stdout, where test harnesses and
        /// examples report their panics.
        stdout_tail: String,
    },
}

/// Lines of stdout kept on a failed invocation.
const STDOUT_TAIL_LINES: usize = 20;

fn failure_detail(stderr: &str, stdout_tail: &str) -> String {
    match (stderr.is_empty(), stdout_tail.is_empty()) {
        (_, true) => stderr.to_string(),
        (true, false) => stdout_tail.to_string(),
        (false, false) => format!("{stderr}\n--- stdout ---\n{stdout_tail}"),
    }
}

/// The last `lines` lines of `output`, ignoring trailing whitespace.
fn tail(output: &str, lines: usize) -> String {
    let kept: Vec<&str> = output.trim_end().lines().collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}

/// Result alias for toolchain operations.
pub type ToolchainResult<T> = Result<T, ToolchainError>;

/// A cargo action crateops knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// `cargo build`
    Build,
    /// `cargo fmt`
    Format,
    /// `cargo test`
    Test,
    /// `cargo publish`
    Publish,
    /// `cargo clean`
    Clean,
    /// `cargo doc`
    Doc,
    /// `cargo metadata`
    Metadata,
    /// `cargo search`
    Search,
    /// `cargo run`
    Run,
}

impl Action {
    /// The cargo subcommand for this action.
    pub const fn subcommand(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Format => "fmt",
            Self::Test => "test",
            Self::Publish => "publish",
            Self::Clean => "clean",
            Self::Doc => "doc",
            Self::Metadata => "metadata",
            Self::Search => "search",
            Self::Run => "run",
        }
    }

    /// Whether the uniform `--verbose` flag applies to this action.
    ///
    /// Query actions (`metadata`, `search`) parse stdout and are left alone,
    /// as is `run`, whose trailing arguments belong to the example binary.
    pub const fn accepts_verbose(self) -> bool {
        !matches!(self, Self::Metadata | Self::Search | Self::Run)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

/// One request to the toolchain: run `action` with `args` inside `dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Working directory (the package directory).
    pub dir: Utf8PathBuf,
    /// The cargo action.
    pub action: Action,
    /// Extra arguments after the subcommand.
    pub args: Vec<String>,
}

impl Invocation {
    /// Create an invocation with no extra arguments.
    pub fn new(dir: impl AsRef<Utf8Path>, action: Action) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            action,
            args: Vec::new(),
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Insert `--verbose` right after the subcommand when `verbose` is set
    /// and the action accepts it.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose && self.action.accepts_verbose() {
            self.args.insert(0, "--verbose".into());
        }
        self
    }

    /// Render as a shell-like command line for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut line = format!("cargo {}", self.action);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Exit status and captured output of a finished invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code (`-1` when terminated by a signal).
    pub status: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl ToolOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status zero.
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Something that can execute cargo invocations.
pub trait Toolchain {
    /// Run the invocation to completion and capture its output.
    ///
    /// Only a failure to spawn is an `Err`; a non-zero exit is reported
    /// through [`ToolOutput::status`]. Use [`run_checked`] to treat non-zero
    /// exits as errors.
    fn invoke(&self, invocation: &Invocation) -> ToolchainResult<ToolOutput>;
}

impl<T: Toolchain + ?Sized> Toolchain for &T {
    fn invoke(&self, invocation: &Invocation) -> ToolchainResult<ToolOutput> {
        (**self).invoke(invocation)
    }
}

/// Run an invocation and turn a non-zero exit into [`ToolchainError::Failed`].
pub fn run_checked(
    toolchain: &dyn Toolchain,
    invocation: &Invocation,
) -> ToolchainResult<ToolOutput> {
    let output = toolchain.invoke(invocation)?;
    if output.success() {
        Ok(output)
    } else {
        Err(ToolchainError::Failed {
            command: invocation.command_line(),
            dir: invocation.dir.clone(),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
            stdout_tail: tail(&output.stdout, STDOUT_TAIL_LINES),
        })
    }
}

/// The real toolchain: spawns the `cargo` binary.
#[derive(Debug, Clone)]
pub struct Cargo {
    program: String,
}

impl Default for Cargo {
    fn default() -> Self {
        Self::new()
    }
}

impl Cargo {
    /// Use `$CARGO` when set (as it is under `cargo run`), else `cargo`.
    pub fn new() -> Self {
        let program = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
        Self { program }
    }

    /// Use an explicit cargo binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Toolchain for Cargo {
    #[instrument(skip(self), fields(command = %invocation.command_line(), dir = %invocation.dir))]
    fn invoke(&self, invocation: &Invocation) -> ToolchainResult<ToolOutput> {
        let output = Command::new(&self.program)
            .arg(invocation.action.subcommand())
            .args(&invocation.args)
            .current_dir(invocation.dir.as_std_path())
            .output()
            .map_err(|source| ToolchainError::Spawn {
                command: invocation.command_line(),
                source,
            })?;

        let status = output.status.code().unwrap_or(-1);
        debug!(status, "cargo exited");

        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Binaries the pipeline shells out to.
pub const REQUIRED_TOOLS: [&str; 2] = ["cargo", "rustfmt"];

/// Whether a required binary is on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    /// Binary name.
    pub name: &'static str,
    /// Resolved location, if found.
    pub path: Option<Utf8PathBuf>,
}

/// Look up every entry of [`REQUIRED_TOOLS`] on `PATH`.
pub fn locate_tools() -> Vec<ToolStatus> {
    REQUIRED_TOOLS
        .iter()
        .map(|&name| {
            let path = which::which(name)
                .ok()
                .and_then(|p| Utf8PathBuf::from_path_buf(p).ok());
            debug!(name, found = path.is_some(), "located tool");
            ToolStatus { name, path }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stub toolchain shared by the stage tests.

    use std::cell::RefCell;

    use super::{Action, Invocation, ToolOutput, Toolchain, ToolchainResult};

    type Responder = Box<dyn Fn(&Invocation) -> ToolOutput>;

    /// Records every invocation and answers with a configurable responder.
    pub struct StubToolchain {
        pub calls: RefCell<Vec<Invocation>>,
        responder: Responder,
    }

    impl StubToolchain {
        /// Every invocation succeeds with empty output.
        pub fn succeeding() -> Self {
            Self::with(|_| ToolOutput::ok(""))
        }

        pub fn with(responder: impl Fn(&Invocation) -> ToolOutput + 'static) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                responder: Box::new(responder),
            }
        }

        pub fn calls_for(&self, action: Action) -> Vec<Invocation> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.action == action)
                .cloned()
                .collect()
        }

        pub fn command_lines(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|c| format!("{} :: {}", c.dir, c.command_line()))
                .collect()
        }
    }

    impl Toolchain for StubToolchain {
        fn invoke(&self, invocation: &Invocation) -> ToolchainResult<ToolOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            Ok((self.responder)(invocation))
        }
    }
}
