//! Console logging for host builds.
//!
//! The binding layer only talks to the `log` facade. On a host the sink
//! is `tracing-subscriber`'s fmt layer: its `tracing-log` bridge picks up
//! `log` records and writes them to stderr with timestamp, level and
//! target.

use tracing_subscriber::filter::LevelFilter;

/// `log` and `tracing` name the same five levels.
fn to_tracing(level: log::LevelFilter) -> LevelFilter {
    match level {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}

/// Install the stderr subscriber with `level` as the maximum.
pub fn init(level: log::LevelFilter) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_max_level(to_tracing(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
}
