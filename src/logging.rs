//! Logging setup and component-scoped loggers for Hestia
//!
//! Logging is initialized once per process from the `logging` config
//! section: console output always, plus a daily-rotated file unless running
//! under tests or `HESTIA_DISABLE_FILE_LOG`. Components log through a small
//! `StructuredLogger` that stamps every line with the component name and,
//! when relevant, the vehicle in scope.

use crate::config::LoggingConfig;
use crate::error::{HestiaError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use tracing::{Level, debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// The non-blocking file writer stops on guard drop; keep it for the process
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();

/// Initialize the tracing subscriber from configuration. Safe to call more
/// than once; only the first call takes effect.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        if let Err(e) = try_init(config) {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    match INIT_ERROR.get() {
        Some(err) => Err(HestiaError::config(err.clone())),
        None => Ok(()),
    }
}

fn try_init(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("hestia={},reqwest=warn", level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if console_only() {
        registry
            .with(sink(std::io::stdout, config.json_format, level))
            .init();
        info!("Logging initialized, level {:?}, console only", level);
        return Ok(());
    }

    let appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("hestia")
        .filename_suffix("log")
        .max_log_files(config.backup_count as usize)
        .build(log_directory(&config.file))
        .map_err(|e| HestiaError::io(format!("Failed to create log file appender: {}", e)))?;
    let (file_writer, guard) = non_blocking(appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = sink(file_writer, config.json_format, level);
    if config.console_output {
        registry
            .with(file_layer)
            .with(sink(std::io::stdout, config.json_format, level))
            .init();
    } else {
        registry.with(file_layer).init();
    }

    info!(
        "Logging initialized, level {:?}, file {}",
        level, config.file
    );
    Ok(())
}

/// File logging is pointless under `cargo test` and undesirable in one-shot
/// invocations; both fall back to console output.
fn console_only() -> bool {
    cfg!(test) || std::env::var_os("HESTIA_DISABLE_FILE_LOG").is_some()
}

/// `logging.file` may name the log file itself or its directory
fn log_directory(configured: &str) -> &Path {
    let p = Path::new(configured);
    if p.extension().is_some() {
        p.parent().unwrap_or(p)
    } else {
        p
    }
}

/// One formatted output layer; plain or JSON, capped at `level`
fn sink<S, W>(writer: W, json: bool, level: Level) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    if json {
        base.json().with_filter(LevelFilter::from_level(level)).boxed()
    } else {
        base.with_filter(LevelFilter::from_level(level)).boxed()
    }
}

fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(HestiaError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

/// Component-scoped logger, optionally narrowed to one vehicle
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    component: String,
    vehicle_id: Option<String>,
}

impl StructuredLogger {
    /// Derive a logger scoped to one vehicle
    pub fn with_vehicle(&self, vehicle_id: &str) -> Self {
        Self {
            component: self.component.clone(),
            vehicle_id: Some(vehicle_id.to_string()),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn info(&self, message: &str) {
        info!(scope = %self.scope(), "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(scope = %self.scope(), "{}", message);
    }

    pub fn error(&self, message: &str) {
        error!(scope = %self.scope(), "{}", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(scope = %self.scope(), "{}", message);
    }

    fn scope(&self) -> String {
        match &self.vehicle_id {
            Some(id) => format!("{}/{}", self.component, id),
            None => self.component.clone(),
        }
    }
}

/// Create a logger for a component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger {
        component: component.to_string(),
        vehicle_id: None,
    }
}
