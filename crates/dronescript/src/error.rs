//! Error types for dronescript.
//!
//! This module defines all error types used throughout the dronescript crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for dronescript operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Link Errors ===
    /// The drone link is not connected.
    #[error("drone '{name}' is not connected")]
    NotConnected {
        /// Name of the drone link.
        name: &'static str,
    },

    /// The drone link is already connected.
    #[error("drone '{name}' is already connected")]
    AlreadyConnected {
        /// Name of the drone link.
        name: &'static str,
    },

    /// A command could not be delivered to the drone.
    #[error("drone link '{name}' failed: {message}")]
    Link {
        /// Name of the drone link.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// The drone reported an emergency state.
    #[error("drone entered emergency state during {phase}")]
    Emergency {
        /// Flight phase in which the emergency was observed.
        phase: String,
    },

    // === Estimation & Vision Errors ===
    /// The state estimator could not produce an estimate.
    #[error("estimation error: {0}")]
    Estimation(String),

    /// A camera frame could not be processed.
    #[error("vision error: {0}")]
    Vision(String),

    // === Mission Errors ===
    /// The flight routine failed.
    #[error("mission '{mission}' failed: {message}")]
    Mission {
        /// Name of the mission.
        mission: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for dronescript operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new link error.
    #[must_use]
    pub fn link(name: &'static str, message: impl Into<String>) -> Self {
        Self::Link {
            name,
            message: message.into(),
        }
    }

    /// Create a new estimation error.
    #[must_use]
    pub fn estimation(message: impl Into<String>) -> Self {
        Self::Estimation(message.into())
    }

    /// Create a new vision error.
    #[must_use]
    pub fn vision(message: impl Into<String>) -> Self {
        Self::Vision(message.into())
    }

    /// Create a new mission error.
    #[must_use]
    pub fn mission(mission: &'static str, message: impl Into<String>) -> Self {
        Self::Mission {
            mission,
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error came from the drone link.
    #[must_use]
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. }
                | Self::AlreadyConnected { .. }
                | Self::Link { .. }
                | Self::Emergency { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected { name: "sim" };
        assert_eq!(err.to_string(), "drone 'sim' is not connected");

        let err = Error::link("sim", "radio silent");
        assert_eq!(err.to_string(), "drone link 'sim' failed: radio silent");
    }

    #[test]
    fn test_error_is_timeout() {
        assert!(Error::timeout("takeoff").is_timeout());
        assert!(!Error::internal("x").is_timeout());
    }

    #[test]
    fn test_error_is_link_error() {
        assert!(Error::NotConnected { name: "sim" }.is_link_error());
        assert!(Error::AlreadyConnected { name: "sim" }.is_link_error());
        assert!(Error::Emergency {
            phase: "takeoff".to_string()
        }
        .is_link_error());
        assert!(!Error::estimation("singular").is_link_error());
    }

    #[test]
    fn test_emergency_display() {
        let err = Error::Emergency {
            phase: "climb".to_string(),
        };
        assert!(err.to_string().contains("climb"));
    }

    #[test]
    fn test_mission_error_display() {
        let err = Error::mission("detection", "no sensor data");
        let msg = err.to_string();
        assert!(msg.contains("detection"));
        assert!(msg.contains("no sensor data"));
    }

    #[test]
    fn test_estimation_and_vision_display() {
        assert_eq!(
            Error::estimation("singular matrix").to_string(),
            "estimation error: singular matrix"
        );
        assert_eq!(
            Error::vision("empty frame").to_string(),
            "vision error: empty frame"
        );
    }

    #[test]
    fn test_timeout_error_display() {
        let err = Error::timeout("sensor calibration");
        assert!(err.to_string().contains("sensor calibration"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "eps must be positive".to_string(),
        };
        assert!(err.to_string().contains("eps must be positive"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
