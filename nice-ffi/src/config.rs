//! Configuration
//!
//! Process-wide defaults for wrapping and library loading. Configuration can be
//! set programmatically or loaded from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `NICE_FFI_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `NICE_FFI_AUTORELEASE` | Track plain pointers for release by default ("true"/"false") | true |
//! | `NICE_FFI_LIBRARY_PATH` | Extra library search directories (OS path-list syntax) | empty |
//! | `NICE_FFI_WARN_OPTIONAL` | Warn when an optional function is missing | true |
//! | `NICE_FFI_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | warn |
//!
//! # Example
//!
//! ```rust
//! use nice_ffi::config::{Config, LogLevel};
//!
//! let config = Config::builder()
//!     .autorelease(false)
//!     .search_path("/opt/sdl/lib")
//!     .log_level(LogLevel::Debug)
//!     .build()
//!     .unwrap();
//! assert!(!config.autorelease);
//! ```

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use thiserror::Error;

/// Log level for crate logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// No logging.
    Off,
    /// Error messages only.
    Error,
    /// Warnings and errors (default).
    #[default]
    Warn,
    /// Informational messages.
    Info,
    /// Debug messages.
    Debug,
    /// Trace-level messages.
    Trace,
}

impl LogLevel {
    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library loading configuration.
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Directories searched before the platform defaults.
    pub search_paths: Vec<PathBuf>,

    /// Log a warning when an optional function is missing.
    /// Default: true.
    pub warn_missing: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            warn_missing: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level. `RUST_LOG` takes precedence when set.
    pub level: LogLevel,

    /// Include the module path of each event.
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            target: cfg!(debug_assertions),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default for [`WrapOptions::autorelease`](crate::WrapOptions).
    /// Default: true.
    pub autorelease: bool,

    /// Library loading configuration.
    pub library: LibraryConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autorelease: true,
            library: LibraryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Create a new builder for Config.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults. Invalid values are logged as
    /// warnings and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_bool("NICE_FFI_AUTORELEASE") {
            config.autorelease = val;
        }

        if let Some(paths) = env::var_os("NICE_FFI_LIBRARY_PATH") {
            config.library.search_paths = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Some(val) = parse_env_bool("NICE_FFI_WARN_OPTIONAL") {
            config.library.warn_missing = val;
        }

        if let Ok(val) = env::var("NICE_FFI_LOG_LEVEL") {
            match LogLevel::parse(&val) {
                Some(level) => config.log.level = level,
                None => tracing::warn!(value = %val, "ignoring invalid NICE_FFI_LOG_LEVEL"),
            }
        }

        config
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self
            .library
            .search_paths
            .iter()
            .find(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "library.search_paths".into(),
                message: format!("entries must not be empty (got {:?})", bad),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

/// Builder for Config.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default autorelease behavior.
    pub fn autorelease(mut self, enabled: bool) -> Self {
        self.config.autorelease = enabled;
        self
    }

    /// Add a library search directory.
    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.library.search_paths.push(path.into());
        self
    }

    /// Enable or disable warnings for missing optional functions.
    pub fn warn_missing(mut self, enabled: bool) -> Self {
        self.config.library.warn_missing = enabled;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> Config {
        self.config
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Install `config` as the process-wide configuration.
///
/// Returns `false` if a configuration was already installed (explicitly or
/// by a prior call to [`config`]); the existing one is kept.
pub fn set_config(config: Config) -> bool {
    CONFIG.set(config).is_ok()
}

/// Get the process-wide configuration, loading it from the environment on
/// first use.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    let parsed = match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!(variable = name, value = %raw, "ignoring invalid boolean");
    }
    parsed
}
