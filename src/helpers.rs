use std::env;
use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Debug log file in the working directory. Never rotated.
pub(crate) const DEBUG_LOG_FILE: &str = "broken-dns-proxy-debug.log";

const CRATE_TARGET: &str = "broken_dns_proxy";

/**
 * Sets `RUST_BACKTRACE=1` as default so we always get a stacktrace
 * on an error.
 */
pub(crate) fn set_full_stacktrace_as_default() {
    let key = "RUST_BACKTRACE";
    if env::var(key).is_ok() {
        return;
    }
    env::set_var(key, "1");
}

/// Console logging plus the debug log file.
/// The returned guard flushes the file on drop and must be kept alive.
pub(crate) fn enable_logging(verbose: bool) -> Option<WorkerGuard> {
    let rust_log = env::var("RUST_LOG").unwrap_or_default();

    let console: Box<dyn Layer<Registry> + Send + Sync> = if !rust_log.is_empty() {
        fmt::layer().with_filter(EnvFilter::from_default_env()).boxed()
    } else {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        fmt::layer()
            .with_filter(Targets::new().with_target(CRATE_TARGET, level))
            .boxed()
    };

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(DEBUG_LOG_FILE)
        .build(".");
    let (file_layer, guard, file_error) = match file_appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(Targets::new().with_target(CRATE_TARGET, Level::DEBUG));
            (Some(layer), Some(guard), None)
        }
        Err(err) => (None, None, Some(err)),
    };

    tracing_subscriber::registry().with(console).with(file_layer).init();

    if !rust_log.is_empty() {
        tracing::info!("Used RUST_LOG={} env variable to set logging output.", rust_log);
        if verbose {
            tracing::warn!("RUST_LOG= is set. Ignore --verbose flag.")
        }
    } else if verbose {
        tracing::info!("Verbose mode enabled.");
    }
    if let Some(err) = file_error {
        tracing::warn!("Failed to open debug log file {DEBUG_LOG_FILE}. {err}");
    }
    guard
}

/**
 * Waits on CTRL+C
 */
pub(crate) async fn wait_on_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {}
        Err(err) => {
            tracing::error!("Unable to listen for shutdown signal Ctrl+C: {}", err);
        }
    }
}
