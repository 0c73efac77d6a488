use std::io;
use std::path::Path;
use std::sync::Once;

use etl_config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directory, relative to the working directory, that receives log files in production.
const LOGS_DIR: &str = "logs";

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to create the log directory: {0}")]
    LogDirectory(#[source] io::Error),

    #[error("failed to build the rolling file appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("failed to install the log bridge: {0}")]
    LogTracer(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the process exits, otherwise the tail of the log file is lost.
#[must_use]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for `app_name`.
///
/// In [`Environment::Dev`] logs go to stdout in a human readable format. In
/// [`Environment::Prod`] they are written as JSON lines to a daily rolling file in
/// `logs/`. The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load().map_err(TracingError::Environment)?;

    // sqlx and a few other dependencies still log through the `log` facade.
    LogTracer::init()?;

    match environment {
        Environment::Dev => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer())
                .try_init()?;

            Ok(LogFlusher { _guard: None })
        }
        Environment::Prod => {
            let logs_dir = Path::new(LOGS_DIR);
            std::fs::create_dir_all(logs_dir).map_err(TracingError::LogDirectory)?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(app_name)
                .filename_suffix("log")
                .build(logs_dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .try_init()?;

            Ok(LogFlusher {
                _guard: Some(guard),
            })
        }
    }
}

/// Installs a subscriber that writes through the test harness, once per process.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
