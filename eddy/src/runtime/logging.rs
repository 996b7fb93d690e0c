use tracing::Level;
use tracing_subscriber::{
    EnvFilter, fmt::Layer, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber: `warn` for dependencies, `log_level` for
/// this crate. DEBUG adds source locations, TRACE adds thread names and ids.
pub fn init_logging(log_level: Level) {
    let mut fmt_layer = Layer::new()
        .with_writer(std::io::stderr)
        .with_ansi(std::env::var("NO_COLOR").is_err());

    match log_level {
        Level::DEBUG => fmt_layer = fmt_layer.with_file(true).with_line_number(true),
        Level::TRACE => {
            fmt_layer = fmt_layer
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        }
        _ => {}
    }

    let filter = EnvFilter::new(format!("warn,eddy={log_level},eddy_queue={log_level}"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
