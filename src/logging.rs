//! Logging setup
//!
//! Maps the numeric `-verbose=N` level onto a `log` filter and installs
//! `env_logger` with a format that carries the thread name. Workers are
//! named `window-<id>`, so interleaved output from many windows can still
//! be followed per window. `RUST_LOG`, when set, overrides the level.
//!
//! ```text
//! 2024-05-01T10:00:00.123Z INFO  [window-3] window-3: SURFACE_READY -> RUNNING
//! ```

use log::LevelFilter;
use std::io::Write;

/// Verbosity used when neither the CLI nor the config sets one
pub const DEFAULT_VERBOSITY: u8 = 2;

/// Level filter for a numeric verbosity
///
/// 0 error, 1 warn, 2 info, 3 debug, anything higher trace.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger.
///
/// Returns `false` if a logger was already installed (tests, embedding);
/// the existing one is kept.
pub fn init(verbosity: u8) -> bool {
    env_logger::Builder::new()
        .filter_level(level_for_verbosity(verbosity))
        .parse_default_env()
        .format(|buf, record| {
            let thread = std::thread::current();
            writeln!(
                buf,
                "{} {:5} [{}] {}",
                buf.timestamp_millis(),
                record.level(),
                thread.name().unwrap_or("unnamed"),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}
