//! Logging setup for embedders of the runtime
//!
//! The runtime only emits `tracing` events, tagged with structured fields
//! such as `action_id`, `job_id`, `data` and `resource`. Installing a
//! subscriber is left to the embedder, which may call [`init_logging`] or
//! bring its own.
//!
//! Filtering is done per runtime component: `[logging.components]` maps a
//! component (see [`COMPONENTS`]) to its own level, e.g. tracing every copy
//! in `comm` while the scheduler stays at `info`. `RUST_LOG` is honored and
//! applied first.

use std::fs;
use std::io;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

const CRATE_TARGET: &str = "taskgraph_core";

/// Runtime components with their own log target
pub const COMPONENTS: &[&str] = &["action", "comm", "data", "resource", "scheduler"];

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Guards that must be held for the lifetime of the application
/// to ensure logs are flushed properly
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber described by `settings`
///
/// Returns guards that flush pending file output when dropped. Fails if a
/// subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<LogGuards> {
    let filter = build_filter(settings)?;
    let console = output_layer(io::stdout, settings.json_format, true);

    let (file_layer, file_guard) = match settings.file {
        Some(ref log_file) => {
            let appender = file_appender(log_file, settings.max_file_size_mb, settings.max_files)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(output_layer(writer, settings.json_format, false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::info!(
        level = %settings.level,
        components = ?settings.components,
        file = ?settings.file,
        "Logging initialized"
    );

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Directive routing one component to its own level
fn component_directive(component: &str, level: &str) -> Result<Directive> {
    if !COMPONENTS.contains(&component) {
        return Err(Error::config_field_invalid(
            format!("logging.components.{}", component),
            format!("Unknown component '{}'", component),
        ));
    }
    let level = parse_level(level).to_string().to_lowercase();
    format!("{}::{}={}", CRATE_TARGET, component, level)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid log directive: {}", e)))
}

/// `RUST_LOG` (or the base level), then the crate, then each component
///
/// Later directives for a longer target win, so component levels override
/// the crate level in both directions.
fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    let base = parse_level(&settings.level).to_string().to_lowercase();
    let crate_directive: Directive = format!("{}={}", CRATE_TARGET, base)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid log directive: {}", e)))?;

    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&base))
        .add_directive(crate_directive);
    for (component, level) in &settings.components {
        filter = filter.add_directive(component_directive(component, level)?);
    }
    Ok(filter)
}

/// One fmt layer over any writer: JSON carries source positions and span
/// timings, text stays compact
fn output_layer<S, W>(writer: W, json: bool, ansi: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_target(true);
    if json {
        Box::new(
            layer
                .json()
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        )
    } else {
        Box::new(layer.with_ansi(ansi).compact())
    }
}

/// Rotating appender for `log_file`, creating its directory
///
/// tracing-appender only rotates on time; small size caps rotate hourly.
fn file_appender(log_file: &str, max_size_mb: u64, max_files: u32) -> Result<RollingFileAppender> {
    let path = Path::new(log_file);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).map_err(|e| Error::IoWrite {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("runtime");
    let rotation = if max_size_mb > 0 && max_size_mb < 10 {
        Rotation::HOURLY
    } else {
        Rotation::DAILY
    };

    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| Error::Config(format!("Failed to create log file appender: {}", e)))
}

/// Compact test-writer output at `level`, for tests and small embedders
pub fn init_simple(level: Level) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_test_writer())
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}
