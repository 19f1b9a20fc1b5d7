use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

/// Log to an hourly rolling file `<dir>/<app_name>.<date-hour>`.
///
/// The returned guard flushes the non-blocking writer when dropped.
pub fn init_file_logging(app_name: &str, dir: &str, level: &str) -> (WorkerGuard, impl Subscriber + Send + Sync) {
    let file_appender = tracing_appender::rolling::hourly(dir, app_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let f_layer = fmt::Layer::new()
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .with_writer(writer)
        .with_ansi(false);

    let subscriber = Registry::default().with(EnvFilter::new(level)).with(f_layer);

    (guard, subscriber)
}
