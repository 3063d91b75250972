//! Daemon-level error type.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("socket setup failed: {0}")]
    SocketSetup(#[from] io::Error),
    #[error("logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
