//! Logging setup.
//!
//! Everything in the engine logs through the `log` facade. This module only
//! installs the `env_logger` backend for binaries and tests that want output.

mod init;

pub use init::{init_logging, LoggingConfig};
