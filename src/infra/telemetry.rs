//! Process-wide log sink: destination, encoding and severity filter.

use std::{
    fs::{DirBuilder, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{Local, NaiveDate};
use tracing::{Dispatch, Level, dispatcher, level_filters::LevelFilter, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt::{self, MakeWriter, format::Writer, time::FormatTime},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

/// Rendering used for every record timestamp, in both encodings.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOG_FILE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Local wall-clock timer printing [`TIMESTAMP_FORMAT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeTimer;

impl FormatTime for DateTimeTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format(TIMESTAMP_FORMAT))
    }
}

#[derive(Debug, Clone)]
pub enum LogDestination {
    Stdout,
    File { path: PathBuf, file: Arc<File> },
}

/// A configured log sink. Build it with [`LogSink::open`] and install it once with
/// [`LogSink::install`], or scope it with [`LogSink::dispatch`].
#[derive(Debug, Clone)]
pub struct LogSink {
    level: LevelFilter,
    format: LogFormat,
    destination: LogDestination,
}

impl LogSink {
    /// Resolve the sink described by `settings`. Never fails: when the log directory or
    /// file cannot be prepared, a warning goes to stderr and the sink writes to stdout.
    pub fn open(settings: &LoggingSettings) -> Self {
        Self::open_at(settings, Local::now().date_naive())
    }

    fn open_at(settings: &LoggingSettings, date: NaiveDate) -> Self {
        let destination = match settings.directory.as_deref() {
            Some(directory) => open_destination(directory, date),
            None => LogDestination::Stdout,
        };

        Self {
            level: settings.level.into(),
            format: settings.format,
            destination,
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn destination(&self) -> &LogDestination {
        &self.destination
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.destination {
            LogDestination::File { path, .. } => Some(path.as_path()),
            LogDestination::Stdout => None,
        }
    }

    /// Build a dispatcher that writes to this sink without touching global state.
    pub fn dispatch(&self) -> Dispatch {
        match &self.destination {
            LogDestination::Stdout => build_dispatch(self.level, self.format, true, io::stdout),
            LogDestination::File { file, .. } => {
                build_dispatch(self.level, self.format, false, Arc::clone(file))
            }
        }
    }

    /// Install this sink as the process-wide default. Succeeds at most once per process.
    pub fn install(&self) -> Result<(), InfraError> {
        self.dispatch().try_init().map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
    }
}

/// Open the sink described by `settings` and install it as the global default.
pub fn init(settings: &LoggingSettings) -> Result<LogSink, InfraError> {
    let sink = LogSink::open(settings);
    sink.install()?;
    Ok(sink)
}

fn build_dispatch<W>(level: LevelFilter, format: LogFormat, ansi: bool, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(DateTimeTimer)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .compact()
            .with_timer(DateTimeTimer)
            .with_ansi(ansi)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(level)
        .with(ErrorLayer::default())
        .with(fmt_layer);

    Dispatch::new(subscriber)
}

fn open_destination(directory: &Path, date: NaiveDate) -> LogDestination {
    if let Err(err) = create_log_dir(directory) {
        report_fallback("failed to create log directory", directory, &err);
        return LogDestination::Stdout;
    }

    let path = log_file_path(directory, date);
    match open_log_file(&path) {
        Ok(file) => LogDestination::File {
            path,
            file: Arc::new(file),
        },
        Err(err) => {
            report_fallback("failed to open log file", &path, &err);
            LogDestination::Stdout
        }
    }
}

fn log_file_path(directory: &Path, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.log", date.format(LOG_FILE_DATE_FORMAT)))
}

fn create_log_dir(directory: &Path) -> io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(directory)
}

fn open_log_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

// The sink is not built yet, so the warning goes through a throwaway stderr subscriber.
fn report_fallback(message: &'static str, path: &Path, err: &io::Error) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        warn!(path = %path.display(), error = %err, "{message}; logging to stdout instead");
    });
}
