//! # CLI Errors
//!
//! Error types for command dispatch. Any error reaching `main` exits the
//! process nonzero.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for CLI commands
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    /// The bootstrap configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The server could not start or crashed
    #[error("Server error: {0}")]
    Server(String),
}

impl CliError {
    /// Machine-readable error code for the exit report
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CONFIG_ERROR",
            CliError::Server(_) => "SERVER_ERROR",
        }
    }

    /// Human-readable message for the exit report
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CliError::Config(ConfigError::EmptyVersion);
        assert_eq!(err.code_str(), "CONFIG_ERROR");

        let err = CliError::Server("bind failed".to_string());
        assert_eq!(err.code_str(), "SERVER_ERROR");
        assert!(err.message().contains("bind failed"));
    }
}
