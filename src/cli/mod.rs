//! # CLI
//!
//! Argument parsing and command dispatch for the `cellgate` binary.

pub mod args;
pub mod commands;
pub mod errors;

pub use args::{Cli, Command};
pub use commands::run_command;
pub use errors::{CliError, CliResult};
