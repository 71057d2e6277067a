// Log setup - console, an error-only file and a combined JSON file
use crate::config::LogSettings;

use std::path::Path;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, time::ChronoLocal},
    prelude::*,
    EnvFilter, Layer, Registry,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Flushes the log files when dropped, keep it alive until exit.
pub struct LogGuards(Vec<WorkerGuard>);

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn file_writer(dir: &Path, name: &str) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Build the subscriber without installing it.
pub fn build(settings: &LogSettings, json_console: bool) -> Result<(impl Subscriber + Send + Sync + 'static, LogGuards), InitError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    if settings.console {
        let console = fmt::layer().with_writer(std::io::stderr).with_target(false);
        if json_console {
            layers.push(console.json().flatten_event(true).with_filter(env_filter()).boxed());
        } else {
            layers.push(console.with_filter(env_filter()).boxed());
        }
    }

    if let Some(dir) = &settings.dir {
        let (writer, guard) = file_writer(dir, &settings.error_file)?;
        guards.push(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_writer(writer)
                .with_filter(LevelFilter::ERROR)
                .boxed(),
        );

        let (writer, guard) = file_writer(dir, &settings.combined_file)?;
        guards.push(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_writer(writer)
                .with_filter(env_filter())
                .boxed(),
        );
    }

    Ok((tracing_subscriber::registry().with(layers), LogGuards(guards)))
}

/// Install the process-wide subscriber.
pub fn init(settings: &LogSettings, json_console: bool) -> Result<LogGuards, InitError> {
    let (subscriber, guards) = build(settings, json_console)?;
    // an earlier subscriber stays in place
    let _ = subscriber.try_init();
    Ok(guards)
}
