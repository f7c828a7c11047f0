use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{AppError, AppResult};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// RUST_LOG wins over the configured level
fn env_filter(default_level: &str) -> AppResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| AppError::InvalidValue(format!("log level {}: {}", default_level, e))),
    }
}

pub fn setup_local_tracing() -> AppResult<()> {
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_test_writer();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter("debug")?)
        .try_init()
        .map_err(|e| AppError::IllegalStateError(e.to_string()))
}

/// Installs the process subscriber: stdout plus an hourly rolling file under `logs/`.
///
/// Keep the returned guard alive for as long as logs should be flushed to the file.
pub fn setup_tracing(log_level: &str) -> AppResult<WorkerGuard> {
    let file_appender = tracing_appender::rolling::hourly("logs", "objdetect.log");
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
    let writer = non_blocking.and(std::io::stdout);

    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(log_level)?)
        .try_init()
        .map_err(|e| AppError::IllegalStateError(e.to_string()))?;

    Ok(worker_guard)
}
