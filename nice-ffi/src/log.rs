//! Logging setup.
//!
//! The crate emits `tracing` events and never installs a subscriber on its
//! own. Applications that have no subscriber of their own can call [`init`].

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogLevel};

/// Install a `fmt` subscriber filtered at the configured level.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `false` if a global
/// subscriber was already installed.
pub fn init(config: &LogConfig) -> bool {
    if config.level == LogLevel::Off && std::env::var_os("RUST_LOG").is_none() {
        return false;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter(config))),
        )
        .with_target(config.target)
        .try_init()
        .is_ok()
}

fn filter(config: &LogConfig) -> String {
    format!("nice_ffi={}", config.level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_scoped_to_crate() {
        let config = LogConfig {
            level: LogLevel::Debug,
            target: false,
        };
        assert_eq!(filter(&config), "nice_ffi=debug");
    }

    #[test]
    fn test_off_installs_nothing() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: LogLevel::Off,
            target: false,
        };
        assert!(!init(&config));
    }
}
