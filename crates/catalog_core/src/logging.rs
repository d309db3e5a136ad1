//! Logging bootstrap and message hygiene.
//!
//! # Responsibility
//! - Initialize the `log` backend exactly once per process, either as
//!   rolling files (long-running hosts) or stderr (one-shot CLI runs).
//! - Keep remote payload excerpts single-line and bounded before they reach
//!   logs or error values.
//!
//! # Invariants
//! - Initialization is idempotent for identical settings.
//! - Re-initialization with a different level or sink is rejected.
//! - Initialization never panics.
//! - Credentials and record bodies are never logged.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "catalog";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Rolling files under an absolute directory.
    Directory(PathBuf),
    Stderr,
}

struct LoggingState {
    level: &'static str,
    sink: LogSink,
    _logger: LoggerHandle,
}

/// Initializes rolling file logs under `log_dir`.
///
/// # Errors
/// - Unsupported `level`.
/// - Empty or relative `log_dir`, or a directory that cannot be created.
/// - Logging already initialized with a different level or sink.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let level = normalize_level(level)?;
    let dir = normalize_log_dir(log_dir)?;
    init_with_sink(level, LogSink::Directory(dir))
}

/// Initializes logging to stderr; used by short-lived command-line runs.
pub fn init_stderr_logging(level: &str) -> Result<(), String> {
    let level = normalize_level(level)?;
    init_with_sink(level, LogSink::Stderr)
}

/// Returns `(level, sink)` once logging is active.
pub fn logging_status() -> Option<(&'static str, LogSink)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.sink.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn init_with_sink(level: &'static str, sink: LogSink) -> Result<(), String> {
    let state = LOGGING_STATE.get_or_try_init(|| start_logger(level, sink.clone()))?;

    if state.sink != sink {
        return Err(format!(
            "logging already initialized with sink {:?}; refusing to switch to {:?}",
            state.sink, sink
        ));
    }
    if state.level != level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            state.level, level
        ));
    }
    Ok(())
}

fn start_logger(level: &'static str, sink: LogSink) -> Result<LoggingState, String> {
    let builder =
        Logger::try_with_str(level).map_err(|err| format!("invalid log level `{level}`: {err}"))?;

    let builder = match &sink {
        LogSink::Directory(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                format!("failed to create log directory `{}`: {err}", dir.display())
            })?;
            builder
                .log_to_file(
                    FileSpec::default()
                        .directory(dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
        }
        LogSink::Stderr => builder
            .log_to_stderr()
            .format_for_stderr(flexi_logger::default_format),
    };

    let logger = builder
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook_once();
    info!(
        "event=core_init module=logging status=ok level={} sink={:?} version={}",
        level,
        sink,
        env!("CARGO_PKG_VERSION")
    );

    Ok(LoggingState {
        level,
        sink,
        _logger: logger,
    })
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    let trimmed = level.trim();
    let candidate = if trimmed.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        trimmed
    };
    match candidate.parse::<LevelFilter>() {
        Ok(LevelFilter::Trace) => Ok("trace"),
        Ok(LevelFilter::Debug) => Ok("debug"),
        Ok(LevelFilter::Info) => Ok("info"),
        Ok(LevelFilter::Warn) => Ok("warn"),
        Ok(LevelFilter::Error) => Ok("error"),
        Ok(LevelFilter::Off) | Err(_) => Err(format!(
            "unsupported log level `{trimmed}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn normalize_log_dir(log_dir: &str) -> Result<PathBuf, String> {
    match log_dir.trim() {
        "" => Err("log_dir cannot be empty".to_string()),
        dir if Path::new(dir).is_absolute() => Ok(PathBuf::from(dir)),
        dir => Err(format!("log_dir must be an absolute path, got `{dir}`")),
    }
}

fn install_panic_hook_once() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info.location().map_or_else(
                || "unknown".to_string(),
                |loc| format!("{}:{}", loc.file(), loc.line()),
            );
            error!(
                "event=panic_captured module=core status=error location={location} payload={}",
                sanitize_message(&panic_payload(info.payload()), MAX_PANIC_PAYLOAD_CHARS)
            );
            previous(info);
        }));
    });
}

fn panic_payload(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Flattens newlines and caps `value` at `max_chars`, marking truncation.
pub(crate) fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}
