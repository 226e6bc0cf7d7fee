use std::io::{stderr, stdout};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::Layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Logging;

/// Print to stderr and exit with a non-zero exit code
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        eprintln!($($arg)*);
        std::process::exit(1);
    }};
}

/// Initialise the global logger.
///
/// The returned guard must be kept alive for the process lifetime so the
/// non-blocking writer can flush.
pub fn new(settings: &Logging) -> WorkerGuard {
    match settings.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => {
            fatal!("Invalid log level `{other}`. Valid levels are: trace, debug, info, warn, error");
        }
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .expect("Failed to create log filter");

    let (writer, guard) = match settings.output.as_str() {
        "stderr" => tracing_appender::non_blocking(stderr()),
        "file" => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("verusgate")
                .filename_suffix("log")
                .build(&settings.file_path)
                .expect("Failed to initialise rolling file appender");
            tracing_appender::non_blocking(appender)
        }
        _ => tracing_appender::non_blocking(stdout()),
    };

    let ansi = settings.output != "file";
    let fmt_layer = if settings.format == "json" {
        fmt::Layer::default()
            .json()
            .with_writer(writer)
            .boxed()
    } else {
        fmt::Layer::default()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed()
    };

    let logger = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(logger).expect("Failed to initialise logger");

    guard
}
