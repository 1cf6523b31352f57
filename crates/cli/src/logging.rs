use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opsdeck_protocol::new_id;

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,tungstenite=warn";
const LOG_FILE_NAME: &str = "opsdeck.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging flags from the command line
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// `EnvFilter` directives; falls back to `RUST_LOG`, then the default
    pub filter: Option<String>,
    pub format: LogFormat,
}

impl LogOptions {
    /// The directives in effect and the filter built from them
    fn resolve_filter(&self) -> anyhow::Result<(String, EnvFilter)> {
        let directives = self
            .filter
            .clone()
            .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let filter = EnvFilter::try_new(&directives)
            .map_err(|e| anyhow::anyhow!("invalid log filter {directives:?}: {e}"))?;
        Ok((directives, filter))
    }
}

pub struct LoggingHandle {
    /// Tags every line of this run in the log file
    pub run_id: String,
    pub log_path: PathBuf,
    pub guard: WorkerGuard,
}

/// Log to `<data_dir>/logs/opsdeck.log` so stdout stays free for the
/// transcript.
pub fn init_logging(data_dir: &Path, options: &LogOptions) -> anyhow::Result<LoggingHandle> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(LOG_FILE_NAME);
    let (directives, filter) = options.resolve_filter()?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME));
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(filter);
    match options.format {
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init()?,
        LogFormat::Pretty => registry
            .with(layer.pretty().with_file(true).with_line_number(true))
            .try_init()?,
    }

    let run_id = new_id();
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_path.display(),
        format = ?options.format,
        filter = %directives,
        "Logging to file"
    );

    Ok(LoggingHandle {
        run_id,
        log_path,
        guard,
    })
}
