//! Development helper: structured logging for tests and benches.
//!
//! Call `surge::dev_tracing::init_tracing()` to print loop, acceptor and
//! connection lifecycle events. `RUST_LOG` is honoured as-is. Setting only
//! `SURGE_LOG` turns on [`DEFAULT_DIRECTIVES`], or the level it names
//! (`SURGE_LOG=trace`). With neither variable set this is a no-op, as it is
//! when a global subscriber is already installed.

use std::env;

/// Filter applied when `SURGE_LOG` is set without a level.
pub const DEFAULT_DIRECTIVES: &str = "surge=debug,surge_core=debug";

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

pub fn init_tracing() {
    let Some(directives) = directives(env::var("RUST_LOG").ok(), env::var("SURGE_LOG").ok()) else {
        return;
    };
    // Loop threads are named surge-loop-N, so thread names identify the loop.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(directives))
        .with_thread_names(true)
        .try_init();
}

/// Filter to install, if any. `RUST_LOG` wins over `SURGE_LOG`.
fn directives(rust_log: Option<String>, surge_log: Option<String>) -> Option<String> {
    if let Some(filter) = rust_log {
        return Some(filter);
    }
    let level = surge_log?.trim().to_ascii_lowercase();
    if LEVELS.contains(&level.as_str()) {
        return Some(format!("surge={level},surge_core={level}"));
    }
    Some(DEFAULT_DIRECTIVES.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_set_installs_nothing() {
        assert_eq!(directives(None, None), None);
    }

    #[test]
    fn rust_log_wins() {
        let got = directives(Some("mio=trace".into()), Some("warn".into()));
        assert_eq!(got.as_deref(), Some("mio=trace"));
    }

    #[test]
    fn surge_log_level_scopes_to_surge_crates() {
        let got = directives(None, Some("TRACE".into()));
        assert_eq!(got.as_deref(), Some("surge=trace,surge_core=trace"));
    }

    #[test]
    fn surge_log_flag_uses_defaults() {
        assert_eq!(directives(None, Some("1".into())).as_deref(), Some(DEFAULT_DIRECTIVES));
    }
}
