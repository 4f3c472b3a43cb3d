//! Core library for crateops.
//!
//! This crate holds every stage of the crate lifecycle pipeline; the
//! `crateops` CLI only parses arguments and renders progress.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading and management
//! - [`toolchain`] - The `cargo` invocation interface
//! - [`package`] - Package introspection via `cargo metadata`
//! - [`manifest`] - `#auto` version stamping
//! - [`publish`] - Publishing with skip-if-published and retry
//! - [`runner`] - Build, format and test stages
//! - [`clean`] - Lockfile and artifact removal
//! - [`docs`] - Documentation build and post-processing
//! - [`golden`] - Golden-image regression testing
//! - [`pipeline`] - Ordered stage driver
//! - [`error`] - Configuration error types
//!
//! # Quick Start
//!
//! ```no_run
//! use crateops_core::pipeline::{Plan, RunOptions};
//! use crateops_core::toolchain::Cargo;
//! use crateops_core::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_user_config(true)
//!     .load()
//!     .expect("Failed to load configuration");
//!
//! let options = RunOptions {
//!     build: true,
//!     test: true,
//!     ..RunOptions::default()
//! };
//! let plan = Plan::new(".", config, options).expect("valid plan");
//! let outcome = plan.execute(&Cargo::new(), |event| println!("{event:?}"));
//! ```
#![deny(unsafe_code)]

pub mod clean;

pub mod config;

pub mod docs;

pub mod error;

pub mod golden;

pub mod manifest;

pub mod package;

pub mod pipeline;

pub mod publish;

pub mod runner;

pub mod toolchain;

pub use config::{Config, ConfigLoader, LogLevel};

pub use error::{ConfigError, ConfigResult};

pub use pipeline::{Plan, RunError, RunEvent, RunOptions, RunOutcome, Stage, StageOutcome};

// Re-export semver so downstream crates don't need a direct dependency.
pub use semver;
