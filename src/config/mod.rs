//! Daemon configuration: command-line flags and the logging config file.

pub mod args;

pub use args::parse_args;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/iec61850_simulator.sock";
pub const DEFAULT_LOGGING_CONFIG: &str = "logging.conf";

/// Resolved command-line configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub socket_path: String,
    pub logging_config: String,
    pub workers: usize,
    pub pdeathsig: bool,
    pub show_version: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            logging_config: DEFAULT_LOGGING_CONFIG.to_string(),
            workers: crate::ipc::server::DEFAULT_WORKERS,
            pdeathsig: false,
            show_version: false,
        }
    }
}

/// Logging settings read from the `--config` file: `key=value` lines with
/// `level`, `file` and `ansi` keys. A missing file yields the defaults, so
/// the daemon always comes up with logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Load from `path`, resolved relative to the working directory.
    pub fn load(path: &str) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return LoggingConfig::default();
        };
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Self {
        let mut config = LoggingConfig::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "level" if !value.is_empty() => config.level = value.to_string(),
                "file" if !value.is_empty() => config.file = Some(value.to_string()),
                "ansi" => config.ansi = value.eq_ignore_ascii_case("true") || value == "1",
                _ => {}
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_logging_config() {
        let config = LoggingConfig::parse(
            "# iecsim logging\nlevel = debug\nfile = /var/log/iecsim.log\nansi = false\n",
        );
        assert_eq!(config.level, "debug");
        assert_eq!(config.file.as_deref(), Some("/var/log/iecsim.log"));
        assert!(!config.ansi);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = LoggingConfig::load("/nonexistent/iecsim-logging.conf");
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = LoggingConfig::parse("rotation=daily\nlevel=warn\n");
        assert_eq!(config.level, "warn");
        assert!(config.file.is_none());
    }
}
