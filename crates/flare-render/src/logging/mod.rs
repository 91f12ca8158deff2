//! Logging utilities.
//!
//! Logger initialization for applications embedding the renderer. Library code
//! only talks to the `log` facade.

mod init;

pub use init::{init_logging, LoggingConfig};
