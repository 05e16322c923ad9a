use rusqlite::ErrorCode;
use thiserror::Error;

/// Main error type for FraudGraph
#[derive(Error, Debug)]
pub enum FraudGraphError {
    /// Required configuration absent or malformed. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backing store or upstream service unreachable, busy or timed out
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Malformed request to the graph store, or stored data that does not match the schema
    #[error("Query error: {0}")]
    Query(String),

    /// Malformed incoming payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Property value outside its allowed range or shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local file system / socket I/O
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FraudGraphError {
    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FraudGraphError::Connectivity(_))
    }
}

impl From<rusqlite::Error> for FraudGraphError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied
                | ErrorCode::FileLockingProtocolFailed
                | ErrorCode::DiskFull
                | ErrorCode::OperationInterrupted => FraudGraphError::Connectivity(err.to_string()),
                _ => FraudGraphError::Query(err.to_string()),
            },
            _ => FraudGraphError::Query(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for FraudGraphError {
    fn from(err: serde_json::Error) -> Self {
        FraudGraphError::Parse(err.to_string())
    }
}

/// Convenient Result type using FraudGraphError
pub type Result<T> = std::result::Result<T, FraudGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FraudGraphError::Configuration("db_path missing".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("db_path missing"));
    }

    #[test]
    fn test_busy_database_is_connectivity() {
        let sqlite_err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err: FraudGraphError = sqlite_err.into();
        assert!(matches!(err, FraudGraphError::Connectivity(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_malformed_sql_is_query_error() {
        let err: FraudGraphError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, FraudGraphError::Query(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FraudGraphError = io_err.into();
        assert!(matches!(err, FraudGraphError::Io(_)));
    }

    #[test]
    fn test_json_error_is_parse_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: FraudGraphError = json_err.into();
        assert!(matches!(err, FraudGraphError::Parse(_)));
    }
}
