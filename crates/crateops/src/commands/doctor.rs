//! Doctor command: diagnose configuration, toolchain and environment.

use clap::Args;
use crateops_core::config;
use crateops_core::toolchain::{self, ToolStatus};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

/// Arguments for the `doctor` subcommand.
#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct DoctorReport {
    directories: DirectoryPaths,
    config: ConfigStatus,
    tools: Vec<ToolStatus>,
    environment: EnvironmentInfo,
}

#[derive(Serialize)]
struct DirectoryPaths {
    config: Option<String>,
    cache: Option<String>,
    data_local: Option<String>,
}

#[derive(Serialize)]
struct ConfigStatus {
    /// Path to loaded config file, if any
    file: Option<String>,
    /// Whether a config file was found
    found: bool,
}

#[derive(Serialize)]
struct EnvironmentInfo {
    /// Current working directory
    cwd: Option<String>,
    /// Relevant environment variables
    env_vars: Vec<EnvVar>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    value: Option<String>,
    description: &'static str,
}

const ENV_VARS: [(&str, &str); 6] = [
    ("XDG_CONFIG_HOME", "Override config directory"),
    ("XDG_CACHE_HOME", "Override cache directory"),
    ("RUST_LOG", "Log filter directive"),
    ("CRATEOPS_LOG_PATH", "Explicit log file path"),
    ("CRATEOPS_LOG_DIR", "Log directory"),
    ("CARGO", "cargo binary to invoke"),
];

impl DoctorReport {
    fn gather(cwd: &camino::Utf8Path) -> Self {
        let config_file = config::find_project_config(cwd);

        Self {
            directories: DirectoryPaths {
                config: config::user_config_dir().map(|p| p.to_string()),
                cache: config::user_cache_dir().map(|p| p.to_string()),
                data_local: config::user_data_local_dir().map(|p| p.to_string()),
            },
            config: ConfigStatus {
                found: config_file.is_some(),
                file: config_file.map(|p| p.to_string()),
            },
            tools: toolchain::locate_tools(),
            environment: EnvironmentInfo {
                cwd: Some(cwd.to_string()),
                env_vars: ENV_VARS
                    .iter()
                    .map(|&(name, description)| EnvVar {
                        name,
                        value: std::env::var(name).ok(),
                        description,
                    })
                    .collect(),
            },
        }
    }

    fn missing_tools(&self) -> impl Iterator<Item = &ToolStatus> {
        self.tools.iter().filter(|t| t.path.is_none())
    }
}

/// Run diagnostics and report configuration status.
///
/// Fails when a required tool is missing from `PATH`.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `cwd` - Current working directory
#[instrument(name = "cmd_doctor", skip_all, fields(json_output))]
pub fn cmd_doctor(
    _args: DoctorArgs,
    global_json: bool,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing doctor command");

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Gathering diagnostics...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let report = DoctorReport::gather(cwd);
    spinner.finish_and_clear();

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", "Configuration".bold().underline());
        if report.config.found {
            println!(
                "  {} Config file: {}",
                "✓".green(),
                report.config.file.as_deref().unwrap_or("").cyan()
            );
        } else {
            println!("  {} No config file found (using defaults)", "○".yellow());
            offer_config_creation()?;
        }
        println!();

        println!("{}", "Toolchain".bold().underline());
        for tool in &report.tools {
            match &tool.path {
                Some(path) => println!("  {} {}: {}", "✓".green(), tool.name, path.cyan()),
                None => println!("  {} {}: {}", "✗".red(), tool.name, "not on PATH".red()),
            }
        }
        println!();

        println!("{}", "Directories".bold().underline());
        print_dir("  Config", report.directories.config.as_deref());
        print_dir("  Cache", report.directories.cache.as_deref());
        print_dir("  Data (local)", report.directories.data_local.as_deref());
        println!();

        println!("{}", "Environment".bold().underline());
        println!("  {}: {}", "Working directory".dimmed(), cwd.cyan());

        let set_vars: Vec<_> = report
            .environment
            .env_vars
            .iter()
            .filter(|v| v.value.is_some())
            .collect();

        if set_vars.is_empty() {
            println!("  {} No XDG/logging overrides set", "○".dimmed());
        } else {
            for var in set_vars {
                println!(
                    "  {}: {}",
                    var.name.dimmed(),
                    var.value.as_deref().unwrap_or("").cyan()
                );
            }
        }
    }

    let missing: Vec<_> = report.missing_tools().map(|t| t.name).collect();
    if !missing.is_empty() {
        anyhow::bail!("required tools not found on PATH: {}", missing.join(", "));
    }
    Ok(())
}

fn print_dir(label: &str, path: Option<&str>) {
    print!("{}: ", label.dimmed());
    match path {
        Some(p) => println!("{}", p.cyan()),
        None => println!("{}", "(unavailable)".yellow()),
    }
}

/// Offer to write a project config file with the default settings.
fn offer_config_creation() -> anyhow::Result<()> {
    // Don't prompt if running non-interactively
    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return Ok(());
    }

    let config_path = camino::Utf8PathBuf::from("crateops.yaml");
    let create = Confirm::new("Create a crateops.yaml with the default settings?")
        .with_default(false)
        .with_help_message("Lists packages, doc package and stage settings")
        .prompt();

    if let Ok(true) = create {
        let yaml = serde_saphyr::to_string(&config::Config::default())?;
        std::fs::write(&config_path, yaml)?;
        println!("  {} Created {}", "✓".green(), config_path.cyan());
    }

    Ok(())
}
