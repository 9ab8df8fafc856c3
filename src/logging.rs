//! Optional log output for chaincode processes.
//!
//! The library only emits `tracing` events. A chaincode binary that wants
//! them on stderr calls [`init`] once at startup.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map a shim log level name onto a tracing level.
///
/// Accepts CRITICAL, ERROR, WARNING, NOTICE, INFO and DEBUG (any case), as
/// well as the tracing names. Unknown names fall back to INFO.
pub fn level_filter(name: &str) -> LevelFilter {
    match name.trim().to_ascii_uppercase().as_str() {
        "CRITICAL" | "ERROR" => LevelFilter::ERROR,
        "WARNING" | "WARN" => LevelFilter::WARN,
        "NOTICE" | "INFO" => LevelFilter::INFO,
        "DEBUG" => LevelFilter::DEBUG,
        "TRACE" => LevelFilter::TRACE,
        "OFF" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Filter directive for the shim's own events at `shim_level`, with
/// everything else at `default_level`.
pub fn directive(shim_level: &str, default_level: &str) -> String {
    format!(
        "{},chaincode_shim={}",
        level_filter(default_level),
        level_filter(shim_level)
    )
}

/// Install a stderr subscriber.
///
/// `RUST_LOG` wins when set. Returns `false` if a global subscriber was
/// already installed.
pub fn init(shim_level: &str, default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(shim_level, default_level)));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .with(filter)
        .try_init()
        .is_ok()
}
