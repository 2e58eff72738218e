//! `tracing` subscriber setup.

use crate::config::{LogLevel, SharedConfig};
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// Output goes to stderr; stdout stays free for worker message channels.
/// `RUST_LOG` overrides `level` when set. Returns `false` if a global
/// subscriber was already installed (the call is then a no-op).
pub fn init_tracing(level: LogLevel, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

/// Install the subscriber described by the `[shared]` config section.
pub fn init_from_shared(shared: &SharedConfig) -> bool {
    init_tracing(shared.log_level, shared.log_json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_noop() {
        let _ = init_tracing(LogLevel::Debug, false);
        assert!(!init_tracing(LogLevel::Debug, true));
    }
}
