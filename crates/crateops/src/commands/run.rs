//! Run command: thin CLI layer over `crateops_core::pipeline`.

use std::cell::RefCell;

use anyhow::Context;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use crateops_core::config::Config;
use crateops_core::pipeline::{Plan, RunEvent, RunOptions, StageOutcome};
use crateops_core::publish::AttemptOutcome;
use crateops_core::toolchain::Cargo;

/// Arguments for the `run` subcommand.
///
/// Stage flags combine freely; stages always run in the order
/// version, publish, build, format, test, test-outputs, clean, doc.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Stamp VERSION into every `#auto` manifest line
    #[arg(long, value_name = "VERSION")]
    pub set_version: Option<String>,

    /// Publish packages not yet on the registry
    #[arg(long)]
    pub publish: bool,

    /// Build packages
    #[arg(long)]
    pub build: bool,

    /// Format packages
    #[arg(long)]
    pub format: bool,

    /// Check formatting and run tests (skips the examples package)
    #[arg(long)]
    pub test: bool,

    /// Render examples and compare against golden images
    #[arg(long)]
    pub test_outputs: bool,

    /// Remove lockfiles and build artifacts
    #[arg(long)]
    pub clean: bool,

    /// Build and post-process documentation
    #[arg(long)]
    pub doc: bool,

    /// Publish attempts per package (overrides config)
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Preview what would happen without making changes
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    fn into_options(self, verbose: bool) -> RunOptions {
        RunOptions {
            set_version: self.set_version,
            publish: self.publish,
            build: self.build,
            format: self.format,
            test: self.test,
            test_outputs: self.test_outputs,
            clean: self.clean,
            doc: self.doc,
            retries: self.retries,
            verbose,
            dry_run: self.dry_run,
        }
    }
}

/// Execute the run command.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `cargo_verbose` - Pass `--verbose` through to cargo
/// * `config` - Loaded configuration
/// * `cwd` - Project root the configured package paths are relative to
#[instrument(name = "cmd_run", skip_all)]
pub fn cmd_run(
    args: RunArgs,
    global_json: bool,
    cargo_verbose: bool,
    config: Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    debug!(
        json_output = global_json,
        dry_run = args.dry_run,
        "executing run command"
    );

    let options = args.into_options(cargo_verbose);
    let is_dry = options.dry_run;
    let plan = Plan::new(cwd, config, options).context("invalid run request")?;

    if !global_json {
        if is_dry {
            println!("{}", "DRY RUN: no changes will be made".yellow().bold());
        }
        let stages: Vec<String> = plan.stages().iter().map(ToString::to_string).collect();
        println!("{}: {}", "Stages".dimmed(), stages.join(" → ").bold());
        println!();
    }

    let display = Display::new(!global_json);
    let outcome = plan
        .execute(&Cargo::new(), |event| display.handle(event))
        .context("run failed");
    display.clear();
    let outcome = outcome?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!();
        let verb = if is_dry { "previewed" } else { "completed" };
        println!(
            "{} {} stage(s) {verb}",
            "✓".green().bold(),
            outcome.stages.len()
        );
        if let Some(golden) = &outcome.golden {
            for m in &golden.comparison.mismatches {
                println!("  {} {} {:?}", "≠".yellow(), m.name.yellow(), m.mismatch);
            }
        }
    }

    Ok(())
}

/// Terminal progress display driven by pipeline events.
struct Display {
    enabled: bool,
    spinner: RefCell<Option<ProgressBar>>,
}

impl Display {
    const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            spinner: RefCell::new(None),
        }
    }

    fn spin(&self, message: String) {
        let mut slot = self.spinner.borrow_mut();
        let spinner = slot.get_or_insert_with(|| {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg}") {
                spinner.set_style(
                    style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
                );
            }
            spinner.enable_steady_tick(std::time::Duration::from_millis(80));
            spinner
        });
        spinner.set_message(message);
    }

    fn clear(&self) {
        if let Some(spinner) = self.spinner.borrow_mut().take() {
            spinner.finish_and_clear();
        }
    }

    fn println(&self, line: String) {
        match self.spinner.borrow().as_ref() {
            Some(spinner) => spinner.println(line),
            None => println!("{line}"),
        }
    }

    fn handle(&self, event: RunEvent) {
        if !self.enabled {
            return;
        }
        match event {
            RunEvent::StageStarted(stage) => self.spin(format!("{stage}...")),
            RunEvent::PackageStarted { stage, package } => {
                self.spin(format!("{stage} {}", package.cyan()));
            }
            RunEvent::ExampleStarted(example) => {
                self.spin(format!("rendering {}", example.cyan()));
            }
            RunEvent::PublishAttempt(attempt) => match attempt.outcome {
                AttemptOutcome::Published => {
                    debug!(package = %attempt.package, attempt = attempt.attempt, "published");
                }
                AttemptOutcome::Failed { error, retry_in } => {
                    let retry = retry_in.map_or_else(
                        || "giving up".to_string(),
                        |d| format!("retrying in {}s", d.as_secs()),
                    );
                    self.println(format!(
                        "  {} {} attempt {} failed: {} ({retry})",
                        "!".yellow(),
                        attempt.package.bold(),
                        attempt.attempt,
                        error.dimmed(),
                    ));
                }
            },
            RunEvent::StageCompleted(stage, outcome) => {
                self.clear();
                match outcome {
                    StageOutcome::Success { message } => {
                        println!(
                            "  {} {} {}",
                            "✓".green(),
                            stage.to_string().bold(),
                            message.dimmed()
                        );
                    }
                    StageOutcome::Planned { actions } => {
                        println!("  {} {}", "○".green(), stage.to_string().bold());
                        for action in actions {
                            println!("    {} {}", "→".dimmed(), action.cyan());
                        }
                    }
                }
            }
        }
    }
}
