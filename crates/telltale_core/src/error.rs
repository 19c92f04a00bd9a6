//! Core error types for TELLTALE.

use std::path::PathBuf;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
///
/// Only construction and I/O paths produce errors. Admission failures,
/// queue overflow, and replay divergences are reported as data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid constructor or setter argument
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument {
        /// Argument name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Filesystem failure
    #[error("IO error at {}: {reason}", path.display())]
    Io {
        /// Path being read or written (empty when unknown)
        path: PathBuf,
        /// Underlying error message
        reason: String,
    },

    /// JSON encode/decode failure
    #[error("Encoding error: {reason}")]
    Encoding {
        /// Underlying error message
        reason: String,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {reason}")]
    Config {
        /// Why validation failed
        reason: String,
    },
}

impl CoreError {
    /// Build an `InvalidArgument` error
    #[must_use]
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_argument("capacity", "must be > 0");
        assert_eq!(format!("{}", err), "Invalid argument capacity: must be > 0");

        let err = CoreError::Config {
            reason: "hash_interval is zero".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid configuration: hash_interval is zero");
    }

    #[test]
    fn test_io_error_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CoreError::io("/tmp/session.json", &io);
        let s = err.to_string();
        assert!(s.contains("/tmp/session.json"));
        assert!(s.contains("gone"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: CoreError = parsed.unwrap_err().into();
        assert!(matches!(err, CoreError::Encoding { .. }));
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::invalid_argument("a", "b");
        let err2 = CoreError::invalid_argument("a", "b");
        assert_eq!(err1, err2);
        assert_ne!(err1, CoreError::invalid_argument("a", "c"));
    }
}
