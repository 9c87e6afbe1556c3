//! Unified error handling for the run-analytics library.
//!
//! Every fallible operation in the crate returns [`Result`]. Per-activity
//! failures are reported through the same type but are caught and skipped by
//! the batch computations, so only store-level failures reach the caller.

use thiserror::Error;

/// Unified error type for analytics operations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// The activity/lap store or a derived table could not be read or written
    #[error("Store error: {message}")]
    Store { message: String },

    /// SQLite adapter failure
    #[cfg(feature = "persistence")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A lap record carries values no computation can use
    #[error("Activity {activity_id} lap {lap_index} is malformed: {reason}")]
    MalformedLap {
        activity_id: i64,
        lap_index: i64,
        reason: String,
    },

    /// An activity listed by the store has no header
    #[error("Activity {activity_id} has no header")]
    MissingActivity { activity_id: i64 },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A per-kind lock was poisoned by a panicking computation
    #[error("Lock for {kind} computation is poisoned")]
    LockPoisoned { kind: &'static str },
}

impl AnalyticsError {
    /// Create a store error from a message
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a configuration error from a message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Extension trait for converting Option to AnalyticsError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a missing activity error.
    fn ok_or_missing_activity(self, activity_id: i64) -> Result<T>;

    /// Convert Option to Result with a generic store error.
    fn ok_or_store(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing_activity(self, activity_id: i64) -> Result<T> {
        self.ok_or(AnalyticsError::MissingActivity { activity_id })
    }

    fn ok_or_store(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AnalyticsError::store(message))
    }
}
