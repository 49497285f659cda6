//! Thread-safe, level-filtered logger shared by every endpoint role (spec §2 item 10, §5 "Shared
//! resources"). `slog::Logger` clones are cheap and already `Send + Sync`, so this module only
//! generalizes `flux::logging::terminal` into a constructor each role can call once and then
//! clone freely — the worker thread and the caller thread each hold their own handle onto the
//! same underlying drain.

pub use flux::logging::Verbosity;
pub use flux::log_exception;

/// Root logger handle. A thin newtype over `slog::Logger` so call sites name `corenet::Logger`
/// rather than reaching into `flux` directly.
pub type Logger = slog::Logger;

/// Builds a terminal logger at the given minimum level, the same shape
/// `flux::logging::terminal` produces for a standalone binary.
pub fn terminal(level: &str) -> Logger {
    flux::logging::terminal(level)
}

/// A logger that discards everything — the default for endpoints constructed without an
/// explicit logger, and for tests that don't want log noise.
pub fn discard() -> Logger {
    flux::logging::discard()
}

/// Tags a child logger with the endpoint role and, where known, the local client id — every
/// buffer role constructs one of these once and threads it through admission, dispatch, and
/// the worker loop.
pub fn for_role(parent: &Logger, role: &'static str) -> Logger {
    parent.new(slog::o!("role" => role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_logger_is_usable() {
        let log = discard();
        let child = for_role(&log, "server");
        slog::info!(child, "test message"; "n" => 1);
    }
}
