//! Build, format and test stages.
//!
//! Each stage walks the package list in order and stops at the first
//! non-zero exit.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, instrument};

use crate::toolchain::{Action, Invocation, Toolchain, ToolchainResult, run_checked};

/// Shared settings for the per-package cargo stages.
#[derive(Clone, Copy)]
pub struct Runner<'a> {
    toolchain: &'a dyn Toolchain,
    verbose: bool,
}

impl<'a> Runner<'a> {
    /// Create a runner.
    pub fn new(toolchain: &'a dyn Toolchain, verbose: bool) -> Self {
        Self { toolchain, verbose }
    }

    fn run(&self, dir: &Utf8Path, action: Action, args: &[&str]) -> ToolchainResult<()> {
        let invocation = Invocation::new(dir, action)
            .args(args.iter().copied())
            .verbose(self.verbose);
        run_checked(self.toolchain, &invocation)?;
        Ok(())
    }

    /// `cargo build` in every package.
    #[instrument(skip_all)]
    pub fn build(
        &self,
        packages: &[Utf8PathBuf],
        on_package: &mut dyn FnMut(&Utf8Path),
    ) -> ToolchainResult<usize> {
        for dir in packages {
            on_package(dir);
            self.run(dir, Action::Build, &[])?;
            info!(%dir, "built");
        }
        Ok(packages.len())
    }

    /// `cargo fmt` in every package.
    #[instrument(skip_all)]
    pub fn format(
        &self,
        packages: &[Utf8PathBuf],
        on_package: &mut dyn FnMut(&Utf8Path),
    ) -> ToolchainResult<usize> {
        for dir in packages {
            on_package(dir);
            self.run(dir, Action::Format, &[])?;
            info!(%dir, "formatted");
        }
        Ok(packages.len())
    }

    /// `cargo fmt -- --check` then `cargo test` in every package except
    /// `skip`.
    ///
    /// Returns the number of packages tested.
    #[instrument(skip_all, fields(skip = ?skip))]
    pub fn test(
        &self,
        packages: &[Utf8PathBuf],
        skip: Option<&Utf8Path>,
        on_package: &mut dyn FnMut(&Utf8Path),
    ) -> ToolchainResult<usize> {
        let mut tested = 0;
        for dir in packages {
            if skip.is_some_and(|s| same_dir(s, dir)) {
                info!(%dir, "skipping examples package");
                continue;
            }
            on_package(dir);
            self.run(dir, Action::Format, &["--", "--check"])?;
            self.run(dir, Action::Test, &[])?;
            info!(%dir, "tested");
            tested += 1;
        }
        Ok(tested)
    }
}

/// Whether two configured package paths name the same directory.
///
/// Paths are compared component-wise, so `./examples` and `examples/` match.
pub fn same_dir(a: &Utf8Path, b: &Utf8Path) -> bool {
    let norm = |p: &Utf8Path| -> Utf8PathBuf {
        p.components()
            .filter(|c| !matches!(c, camino::Utf8Component::CurDir))
            .collect()
    };
    norm(a) == norm(b)
}
