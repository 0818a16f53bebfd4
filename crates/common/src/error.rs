//! Common error types for the failover daemon crates.

use std::fmt;

/// A specialized Result type for failover operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for failover operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new routing error.
    pub fn routing(msg: impl fmt::Display) -> Self {
        Error::Routing(msg.to_string())
    }

    /// Create a new error for an external command that exited unsuccessfully.
    pub fn command(command: impl fmt::Display, msg: impl fmt::Display) -> Self {
        Error::Command {
            command: command.to_string(),
            message: msg.to_string(),
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = Error::command("ip route get 10.0.0.1", "exit status 1");
        assert_eq!(
            err.to_string(),
            "Command `ip route get 10.0.0.1` failed: exit status 1"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
