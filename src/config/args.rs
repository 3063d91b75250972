//! Command-line argument parsing.
//!
//! Supported forms:
//! - `--socket path` / `--socket=path` (or a bare positional path)
//! - `--config path` / `--config=path`
//! - `--workers=N`
//! - `--pdeathsig`
//! - `-v` / `--version`

use super::AppConfig;

/// Parse the daemon flags from the full argument list (program name at
/// index 0). Unknown `-`-prefixed arguments are ignored; any positional
/// argument is taken as the socket path.
pub fn parse_args(args: &[String]) -> AppConfig {
    let mut config = AppConfig::default();

    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];

        if arg == "-v" || arg == "--version" {
            config.show_version = true;
            i += 1;
            continue;
        }

        if arg == "--pdeathsig" {
            config.pdeathsig = true;
            i += 1;
            continue;
        }

        if arg == "--socket" && i + 1 < args.len() {
            config.socket_path = args[i + 1].clone();
            i += 2;
            continue;
        }
        if let Some(path) = arg.strip_prefix("--socket=") {
            config.socket_path = path.to_string();
            i += 1;
            continue;
        }

        if arg == "--config" && i + 1 < args.len() {
            config.logging_config = args[i + 1].clone();
            i += 2;
            continue;
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            config.logging_config = path.to_string();
            i += 1;
            continue;
        }

        if arg == "--workers" && i + 1 < args.len() {
            if let Ok(n) = args[i + 1].parse() {
                config.workers = n;
            }
            i += 2;
            continue;
        }
        if let Some(n) = arg.strip_prefix("--workers=") {
            if let Ok(n) = n.parse() {
                config.workers = n;
            }
            i += 1;
            continue;
        }

        if !arg.starts_with('-') {
            config.socket_path = arg.clone();
        }
        i += 1;
    }

    config
}
