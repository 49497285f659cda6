//! Thread-safe, level-filtered logger shared by every endpoint role.
//!
//! `slog::Logger` handles are cheap to clone and already `Send + Sync`, so the only job here is
//! building one consistently from a `sloggers::Config` the way a standalone binary would load it
//! from a TOML file, and exposing the verbosity rule the core's error-handling policy relies on:
//! every recoverable error gets logged at `exception` level rather than silently vanishing.

use slog::Drain;
use sloggers::{Config, LoggerConfig};

/// Verbosity rule a call site picks when reporting a recoverable condition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verbosity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Reserved for the "swallow and log" error-handling policy: decode failures, dropped
    /// messages, permission violations — conditions that never tear down the I/O loop.
    Exception,
}

/// Build a terminal logger at the given minimum level. Mirrors the ad-hoc `LoggerConfig` TOML
/// that used to be inlined at the call site, except the level is now a parameter instead of a
/// hardcoded string.
pub fn terminal(level: &str) -> slog::Logger {
    let toml = format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    );

    let config: LoggerConfig = serdeconv::from_toml_str(&toml).expect("malformed logger config");

    config.build_logger().expect("failed to build logger")
}

/// Root logger for tests and examples: debug verbosity, terminal destination.
pub fn default_logger() -> slog::Logger {
    terminal("debug")
}

/// Log a recoverable condition at [`Verbosity::Exception`], per the error-handling policy in
/// spec §7: these never abort the I/O loop, they are only ever observed through logs.
#[macro_export]
macro_rules! log_exception {
    ($logger:expr, $($args:tt)+) => {
        slog::error!($logger, $($args)+; "verbosity" => "exception")
    };
}

/// A logger that discards everything — used by tests that don't want log noise but still need
/// to satisfy a `&slog::Logger` parameter.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard.fuse(), slog::o!())
}
