use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Usage errors: programmer bugs, raised as panics by the blocking API
// =============================================================================

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    #[error("send on closed queue")]
    SendOnClosed,

    #[error("close of closed queue")]
    CloseOfClosed,
}

// =============================================================================
// Non-blocking and deadline results
// =============================================================================

/// Returned by [`try_send`](crate::RendezvousQueue::try_send). The value that
/// could not be sent is handed back.
#[derive(Error, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    #[error("sending on a full queue")]
    Full(T),

    #[error("sending on a closed queue")]
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, TrySendError::Full(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TrySendError::Closed(_))
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Returned by [`send_timeout`](crate::RendezvousQueue::send_timeout).
#[derive(Error, Clone, Copy, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    #[error("timed out waiting on send operation")]
    Timeout(T),

    #[error("sending on a closed queue")]
    Closed(T),
}

impl<T> SendTimeoutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendTimeoutError::Timeout(value) | SendTimeoutError::Closed(value) => value,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SendTimeoutError::Timeout(_))
    }
}

impl<T> fmt::Debug for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendTimeoutError::Timeout(_) => f.write_str("Timeout(..)"),
            SendTimeoutError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("receiving on an empty queue")]
    Empty,

    #[error("receiving on a closed and drained queue")]
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    #[error("timed out waiting on receive operation")]
    Timeout,

    #[error("receiving on a closed and drained queue")]
    Closed,
}

/// Returned when a calculation is asked to run without an operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcError {
    #[error("invalid operation")]
    InvalidOperation,
}

// =============================================================================
// Demo configuration errors
// =============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid value for field '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_messages() {
        assert_eq!(UsageError::SendOnClosed.to_string(), "send on closed queue");
        assert_eq!(UsageError::CloseOfClosed.to_string(), "close of closed queue");
    }

    #[test]
    fn test_try_send_error_returns_value() {
        struct NotDebug(u8);

        let err = TrySendError::Full(NotDebug(7));
        assert!(err.is_full());
        assert_eq!(format!("{:?}", err), "Full(..)");
        assert_eq!(err.into_inner().0, 7);

        let err = TrySendError::Closed(NotDebug(9));
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "sending on a closed queue");
    }

    #[test]
    fn test_send_timeout_error_returns_value() {
        let err = SendTimeoutError::Timeout("late");
        assert!(err.is_timeout());
        assert_eq!(err.into_inner(), "late");
    }

    #[test]
    fn test_calc_error_message() {
        assert_eq!(CalcError::InvalidOperation.to_string(), "invalid operation");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("select_candidates", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid value for field 'select_candidates': must be at least 1"
        );
    }
}
