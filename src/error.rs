use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the session pool, the chunk processor and the
/// isolated host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The capability is not supported or not enabled on this device
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    /// The model asset has not been fetched yet
    #[error("Model download pending: {0}")]
    DownloadPending(String),

    #[error("Session creation failed after {attempts} attempt(s): {message}")]
    CreationFailed { attempts: u32, message: String },

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// The isolated execution context went away mid-request
    #[error("Isolated context failed: {0}")]
    IsolationFailed(String),

    #[error("Session pool is shut down")]
    Shutdown,
}

impl CapabilityError {
    /// Whether trying again later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::DownloadPending(_)
                | CapabilityError::CreationFailed { .. }
                | CapabilityError::IsolationFailed(_)
        )
    }

    /// Whether this is a user-initiated stop rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CapabilityError::Cancelled)
    }

    /// Short, end-user facing message for this kind of failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            CapabilityError::Unavailable(_) => {
                "The on-device model is not available. Check that the local model runtime is installed and running."
            }
            CapabilityError::DownloadPending(_) => {
                "The model is still downloading. Try again in a few minutes."
            }
            CapabilityError::CreationFailed { .. } => {
                "The model could not be started. Try again shortly."
            }
            CapabilityError::ProcessingFailed(_) => {
                "The model failed to process this text. Try a shorter article."
            }
            CapabilityError::Cancelled => "Cancelled.",
            CapabilityError::IsolationFailed(_) => {
                "The model worker stopped unexpectedly. It will be restarted on the next request."
            }
            CapabilityError::Shutdown => "The assistant is shutting down.",
        }
    }
}

// Serialized as the display string, the same way the UI layer expects errors
impl Serialize for CapabilityError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CapabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(CapabilityError::DownloadPending("m".into()).is_retryable());
        assert!(CapabilityError::CreationFailed {
            attempts: 3,
            message: "boom".into()
        }
        .is_retryable());
        assert!(!CapabilityError::Unavailable("no".into()).is_retryable());
        assert!(!CapabilityError::ProcessingFailed("bad".into()).is_retryable());
        assert!(!CapabilityError::Cancelled.is_retryable());
    }

    #[test]
    fn cancelled_is_distinct() {
        assert!(CapabilityError::Cancelled.is_cancelled());
        assert!(!CapabilityError::Shutdown.is_cancelled());
    }

    #[test]
    fn serializes_as_display_string() {
        let err = CapabilityError::CreationFailed {
            attempts: 3,
            message: "host crashed".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            "\"Session creation failed after 3 attempt(s): host crashed\""
        );
    }
}
