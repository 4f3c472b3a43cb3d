//! Structured JSONL logging for crateops runs.
//!
//! stdout carries command output (including `--json` reports), so log
//! records only ever go to a file or, as a last resort, stderr.

use anyhow::Result;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::Event;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

const ENV_LOG_PATH: &str = "CRATEOPS_LOG_PATH";
const ENV_LOG_DIR: &str = "CRATEOPS_LOG_DIR";
const SYSTEM_LOG_DIR: &str = "/var/log";
const LOG_EXTENSION: &str = "jsonl";

/// Where log records should go and what to tag them with.
#[derive(Clone, Debug)]
pub struct ObservabilityConfig {
    /// Name written into every record and used for the log file name.
    pub service: String,
    /// `log_dir` from the loaded config, if any.
    pub log_dir: Option<PathBuf>,
}

impl ObservabilityConfig {
    /// Build from the crate name plus the configured log directory.
    pub fn from_env_with_overrides(log_dir: Option<PathBuf>) -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_string(),
            log_dir,
        }
    }

    fn file_name(&self) -> String {
        format!("{}.{LOG_EXTENSION}", self.service)
    }
}

/// How the log destination was chosen; recorded in the first log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    PathVar,
    DirVar,
    Config,
    Fallback,
}

impl Source {
    const fn as_str(self) -> &'static str {
        match self {
            Self::PathVar => ENV_LOG_PATH,
            Self::DirVar => ENV_LOG_DIR,
            Self::Config => "config",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug)]
struct LogTarget {
    dir: PathBuf,
    file_name: String,
    source: Source,
}

impl LogTarget {
    #[cfg(test)]
    fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Keeps the non-blocking writer flushing until dropped at exit.
pub struct ObservabilityGuard {
    _log_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Never fails on an unwritable log location: that case falls back to
/// stderr with a warning. The `Result` leaves room for subscriber setup
/// errors.
pub fn init_observability(
    cfg: &ObservabilityConfig,
    env_filter: EnvFilter,
) -> Result<ObservabilityGuard> {
    let overrides = Overrides::from_env(cfg.log_dir.clone());
    let (writer, guard, source) = match resolve_target(cfg, overrides) {
        Ok(target) => {
            let appender = tracing_appender::rolling::daily(&target.dir, &target.file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, Some(target.source))
        }
        Err(err) => {
            eprintln!("Warning: {err}. Logging to stderr instead.");
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, None)
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(JsonLogLayer::new(writer, &cfg.service))
        .init();

    tracing::debug!(
        log_source = source.map_or("stderr", Source::as_str),
        pid = std::process::id(),
        "logging initialized"
    );

    Ok(ObservabilityGuard { _log_guard: guard })
}

/// Pick the log filter: `--quiet`, then `-v`/`-vv`, then `RUST_LOG`, then
/// the configured level.
pub fn env_filter(quiet: bool, verbose: u8, default_level: &str) -> EnvFilter {
    match (quiet, verbose) {
        (true, _) => EnvFilter::new("error"),
        (false, 0) => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
        }
        (false, 1) => EnvFilter::new("debug"),
        (false, _) => EnvFilter::new("trace"),
    }
}

// ──── JSON layer ────

struct JsonLogLayer<W> {
    writer: W,
    service: String,
}

impl<W> JsonLogLayer<W> {
    fn new(writer: W, service: &str) -> Self {
        Self {
            writer,
            service: service.to_string(),
        }
    }
}

impl<S, W> tracing_subscriber::Layer<S> for JsonLogLayer<W>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: LayerContext<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = FieldMap::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(fields);
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: LayerContext<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut recorded = FieldMap::default();
        values.record(&mut recorded);
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<FieldMap>() {
            Some(fields) => fields.0.extend(recorded.0),
            None => extensions.insert(recorded),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: LayerContext<'_, S>) {
        let meta = event.metadata();
        let mut record = Map::new();
        record.insert(
            "timestamp".into(),
            Value::String(humantime::format_rfc3339_millis(SystemTime::now()).to_string()),
        );
        record.insert("level".into(), Value::String(meta.level().as_str().to_lowercase()));
        record.insert("service".into(), Value::String(self.service.clone()));
        record.insert("target".into(), Value::String(meta.target().to_string()));

        // Outer spans first so inner fields (e.g. `stage`) win on collision.
        let mut spans = Vec::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                spans.push(Value::String(span.name().to_string()));
                if let Some(fields) = span.extensions().get::<FieldMap>() {
                    record.extend(fields.0.clone());
                }
            }
        }
        if !spans.is_empty() {
            record.insert("spans".into(), Value::Array(spans));
        }

        let mut fields = FieldMap::default();
        event.record(&mut fields);
        record.extend(fields.0);

        let mut writer = self.writer.make_writer();
        if serde_json::to_writer(&mut writer, &Value::Object(record)).is_ok() {
            let _ = writer.write_all(b"\n");
        }
    }
}

/// Field values captured from a span or event.
#[derive(Clone, Debug, Default)]
struct FieldMap(Map<String, Value>);

impl FieldMap {
    fn put(&mut self, field: &tracing::field::Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl tracing::field::Visit for FieldMap {
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.put(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.put(field, Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        let value = serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number);
        self.put(field, value);
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

// ──── Target resolution ────

/// Locations that take precedence over the fallback search.
#[derive(Clone, Debug, Default)]
struct Overrides {
    path: Option<PathBuf>,
    dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
}

impl Overrides {
    fn from_env(config_dir: Option<PathBuf>) -> Self {
        Self {
            path: std::env::var_os(ENV_LOG_PATH).map(PathBuf::from),
            dir: std::env::var_os(ENV_LOG_DIR).map(PathBuf::from),
            config_dir,
        }
    }
}

fn resolve_target(cfg: &ObservabilityConfig, overrides: Overrides) -> Result<LogTarget, String> {
    if let Some(path) = overrides.path {
        return target_from_path(path);
    }
    let explicit = overrides
        .dir
        .map(|dir| (dir, Source::DirVar))
        .or_else(|| overrides.config_dir.map(|dir| (dir, Source::Config)));
    if let Some((dir, source)) = explicit {
        let file_name = cfg.file_name();
        ensure_writable(&dir, &file_name)?;
        return Ok(LogTarget {
            dir,
            file_name,
            source,
        });
    }

    let file_name = cfg.file_name();
    fallback_dirs(&cfg.service)
        .into_iter()
        .find(|dir| ensure_writable(dir, &file_name).is_ok())
        .map(|dir| LogTarget {
            dir,
            file_name,
            source: Source::Fallback,
        })
        .ok_or_else(|| "no writable log directory found".to_string())
}

fn fallback_dirs(service: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if cfg!(unix) {
        dirs.push(PathBuf::from(SYSTEM_LOG_DIR));
    }
    if let Some(proj) = directories::ProjectDirs::from("", "", service) {
        dirs.push(proj.data_local_dir().join("logs"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    dirs
}

fn target_from_path(path: PathBuf) -> Result<LogTarget, String> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| format!("{ENV_LOG_PATH} must end in a UTF-8 file name"))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    ensure_writable(&dir, &file_name)?;
    Ok(LogTarget {
        dir,
        file_name,
        source: Source::PathVar,
    })
}

fn ensure_writable(dir: &Path, file_name: &str) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create log directory {}: {e}", dir.display()))?;
    let path = dir.join(file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open log file {}: {e}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> ObservabilityConfig {
        ObservabilityConfig {
            service: "demo".into(),
            log_dir: None,
        }
    }

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(env_filter(true, 2, "info").to_string(), "error");
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(env_filter(false, 1, "info").to_string(), "debug");
        assert_eq!(env_filter(false, 3, "info").to_string(), "trace");
    }

    #[test]
    fn path_override_wins_over_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("nested").join("run.jsonl");
        let overrides = Overrides {
            path: Some(file.clone()),
            dir: Some(tmp.path().join("ignored")),
            config_dir: Some(tmp.path().join("also-ignored")),
        };

        let target = resolve_target(&demo(), overrides).unwrap();
        assert_eq!(target.path(), file);
        assert_eq!(target.source, Source::PathVar);
        assert!(file.is_file());
    }

    #[test]
    fn dir_var_beats_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            path: None,
            dir: Some(tmp.path().join("env")),
            config_dir: Some(tmp.path().join("config")),
        };

        let target = resolve_target(&demo(), overrides).unwrap();
        assert_eq!(target.dir, tmp.path().join("env"));
        assert_eq!(target.file_name, "demo.jsonl");
        assert_eq!(target.source, Source::DirVar);
    }

    #[test]
    fn config_dir_used_without_env() {
        let tmp = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            config_dir: Some(tmp.path().to_path_buf()),
            ..Overrides::default()
        };

        let target = resolve_target(&demo(), overrides).unwrap();
        assert_eq!(target.path(), tmp.path().join("demo.jsonl"));
        assert_eq!(target.source, Source::Config);
    }

    #[test]
    fn path_override_splits_dir_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let target = target_from_path(tmp.path().join("x.jsonl")).unwrap();
        assert_eq!(target.dir, tmp.path());

        let err = target_from_path(PathBuf::from("/")).unwrap_err();
        assert!(err.contains(ENV_LOG_PATH));
    }

    #[test]
    fn fallback_dirs_end_with_cwd() {
        let dirs = fallback_dirs("demo");
        assert_eq!(dirs.last(), std::env::current_dir().ok().as_ref());
    }
}
