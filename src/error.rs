//! Unified error hierarchy for sleeprs
//!
//! Provider failures, persistence failures and configuration problems each
//! have their own enum so a pipeline step can decide what to abort and what
//! to roll back. Missing baseline history is deliberately absent: it is a
//! computed state carried by sentinel values, not an error.

use thiserror::Error;

use crate::models::DataType;

/// Top-level error type for all sleeprs operations
#[derive(Debug, Error)]
pub enum SleepRsError {
    /// Sensor-data provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Persistent store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The run was cancelled between pages or steps
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the external sensor-data provider
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The platform does not support this data type
    #[error("Data type not available on this platform: {data_type}")]
    Unavailable { data_type: DataType },

    /// The user denied read access
    #[error("Authorization denied for {data_type}")]
    AuthorizationDenied { data_type: DataType },

    /// The provider has nothing for this query; callers treat it as an empty result
    #[error("No data available for {data_type}")]
    NoDataAvailable { data_type: DataType },

    /// The fetch itself failed
    #[error("Fetch failed for {data_type}: {reason}")]
    Fetch { data_type: DataType, reason: String },

    /// The fetch did not complete in time
    #[error("Fetch for {data_type} timed out after {seconds}s")]
    Timeout { data_type: DataType, seconds: u64 },
}

/// Persistent store errors
///
/// Any of these aborts the current unit of work; staged changes are dropped.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The save could not be completed and was rolled back
    #[error("Persistence failure: {reason}")]
    PersistenceFailure { reason: String },

    /// SQLite backend error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for sleeprs operations
pub type Result<T> = std::result::Result<T, SleepRsError>;

impl ProviderError {
    /// An empty result rather than a failure
    pub fn is_no_data(&self) -> bool {
        matches!(self, ProviderError::NoDataAvailable { .. })
    }
}

impl SleepRsError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SleepRsError::Provider(ProviderError::Fetch { .. })
                | SleepRsError::Provider(ProviderError::Timeout { .. })
                | SleepRsError::Store(StoreError::Sqlite(_))
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SleepRsError::Provider(ProviderError::NoDataAvailable { .. }) => ErrorSeverity::Info,
            SleepRsError::Provider(ProviderError::Unavailable { .. }) => ErrorSeverity::Warning,
            SleepRsError::Provider(ProviderError::Timeout { .. }) => ErrorSeverity::Warning,
            SleepRsError::Cancelled => ErrorSeverity::Info,
            SleepRsError::Provider(_) => ErrorSeverity::Error,
            SleepRsError::Store(_) => ErrorSeverity::Error,
            SleepRsError::Configuration(_) => ErrorSeverity::Error,
            SleepRsError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SleepRsError::Provider(ProviderError::AuthorizationDenied { .. }) => {
                "Health data access was denied. Grant read access to sync sleep data.".to_string()
            }
            SleepRsError::Provider(ProviderError::Unavailable { data_type }) => {
                format!("{} is not available on this device", data_type)
            }
            SleepRsError::Provider(ProviderError::Timeout { .. }) => {
                "The health data source took too long to respond. Try again later.".to_string()
            }
            SleepRsError::Store(StoreError::PersistenceFailure { .. }) => {
                "Could not save sleep data. No changes were lost from earlier syncs.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = SleepRsError::Provider(ProviderError::NoDataAvailable {
            data_type: DataType::SleepAnalysis,
        });
        assert_eq!(err.severity(), ErrorSeverity::Info);

        let err = SleepRsError::Internal("test".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_error_retryable() {
        let err = SleepRsError::Provider(ProviderError::Timeout {
            data_type: DataType::HeartRate,
            seconds: 30,
        });
        assert!(err.is_retryable());

        let err = SleepRsError::Provider(ProviderError::AuthorizationDenied {
            data_type: DataType::HeartRate,
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = SleepRsError::Store(StoreError::PersistenceFailure {
            reason: "disk full".to_string(),
        });
        assert!(err.user_message().contains("Could not save"));

        let err = SleepRsError::Provider(ProviderError::Unavailable {
            data_type: DataType::WristTemperature,
        });
        assert!(err.user_message().contains("wrist_temperature"));
    }
}
