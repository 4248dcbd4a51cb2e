//! Error types for the router.

use thiserror::Error;

/// Errors that can occur while handling gateway traffic.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The status store rejected an update.
    #[error("status store error: {0}")]
    Status(String),

    /// No status has been recorded for the gateway yet.
    #[error("no status recorded for gateway")]
    NoStatus,

    /// Utilization accounting failed.
    #[error("utilization error: {0}")]
    Utilization(String),

    /// The downlink could not be scheduled.
    #[error("cannot schedule downlink {identifier}: {reason}")]
    ScheduleConflict {
        /// Scheduling identifier of the rejected downlink.
        identifier: String,
        /// Why scheduling failed.
        reason: String,
    },

    /// The gateway has been disconnected.
    #[error("gateway disconnected")]
    Disconnected,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_conflict_display() {
        let err = RouterError::ScheduleConflict {
            identifier: "dl-1".to_string(),
            reason: "too late".to_string(),
        };
        assert_eq!(err.to_string(), "cannot schedule downlink dl-1: too late");
    }

    #[test]
    fn test_plain_variants_display() {
        assert_eq!(RouterError::Disconnected.to_string(), "gateway disconnected");
        assert_eq!(
            RouterError::NoStatus.to_string(),
            "no status recorded for gateway"
        );
        assert_eq!(
            RouterError::Config("bad".to_string()).to_string(),
            "configuration error: bad"
        );
    }
}
