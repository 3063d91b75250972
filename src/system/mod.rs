//! Platform integration: logging setup and process wiring.

pub mod logging;
pub mod process;
