//! Wire messages between the primary context and the isolated worker.
//!
//! Every message is one JSON object on its own line. Requests carry a UUID
//! that the matching response echoes back.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::CapabilityConfig;
use crate::chunking::ChunkLimits;
use crate::error::CapabilityError;
use crate::pool::PoolStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IsolateRequest {
    /// Run text through the worker's chunk processor
    Process {
        text: String,
        config: CapabilityConfig,
        limits: ChunkLimits,
    },
    Stats,
    DestroyAll,
    /// Cancel the in-flight request with id `target`; never answered
    Cancel { target: Uuid },
    /// Drain the pool and exit
    Shutdown,
}

impl IsolateRequest {
    pub fn name(&self) -> &'static str {
        match self {
            IsolateRequest::Process { .. } => "process",
            IsolateRequest::Stats => "stats",
            IsolateRequest::DestroyAll => "destroy_all",
            IsolateRequest::Cancel { .. } => "cancel",
            IsolateRequest::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IsolateResponse {
    Output { text: String },
    Stats { stats: PoolStats },
    /// Number of sessions destroyed
    Destroyed { count: usize },
}

/// Error kinds that survive the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unavailable,
    DownloadPending,
    CreationFailed,
    ProcessingFailed,
    Cancelled,
    IsolationFailed,
    Shutdown,
    /// The worker could not understand the request
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl WireError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            message: message.into(),
            attempts: None,
        }
    }
}

impl From<&CapabilityError> for WireError {
    fn from(err: &CapabilityError) -> Self {
        let (code, message, attempts) = match err {
            CapabilityError::Unavailable(m) => (ErrorCode::Unavailable, m.clone(), None),
            CapabilityError::DownloadPending(m) => (ErrorCode::DownloadPending, m.clone(), None),
            CapabilityError::CreationFailed { attempts, message } => {
                (ErrorCode::CreationFailed, message.clone(), Some(*attempts))
            }
            CapabilityError::ProcessingFailed(m) => (ErrorCode::ProcessingFailed, m.clone(), None),
            CapabilityError::Cancelled => (ErrorCode::Cancelled, String::new(), None),
            CapabilityError::IsolationFailed(m) => (ErrorCode::IsolationFailed, m.clone(), None),
            CapabilityError::Shutdown => (ErrorCode::Shutdown, String::new(), None),
        };
        Self {
            code,
            message,
            attempts,
        }
    }
}

impl From<WireError> for CapabilityError {
    fn from(err: WireError) -> Self {
        match err.code {
            ErrorCode::Unavailable => CapabilityError::Unavailable(err.message),
            ErrorCode::DownloadPending => CapabilityError::DownloadPending(err.message),
            ErrorCode::CreationFailed => CapabilityError::CreationFailed {
                attempts: err.attempts.unwrap_or(0),
                message: err.message,
            },
            ErrorCode::ProcessingFailed => CapabilityError::ProcessingFailed(err.message),
            ErrorCode::Cancelled => CapabilityError::Cancelled,
            ErrorCode::IsolationFailed => CapabilityError::IsolationFailed(err.message),
            ErrorCode::Shutdown => CapabilityError::Shutdown,
            ErrorCode::BadRequest => {
                CapabilityError::IsolationFailed(format!("worker rejected request: {}", err.message))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: Uuid,
    pub request: IsolateRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(IsolateResponse),
    Err(WireError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: Uuid,
    pub outcome: Outcome,
}

impl ResponseEnvelope {
    pub fn new(id: Uuid, result: Result<IsolateResponse, CapabilityError>) -> Self {
        let outcome = match result {
            Ok(response) => Outcome::Ok(response),
            Err(err) => Outcome::Err(WireError::from(&err)),
        };
        Self { id, outcome }
    }

    pub fn into_result(self) -> Result<IsolateResponse, CapabilityError> {
        match self.outcome {
            Outcome::Ok(response) => Ok(response),
            Outcome::Err(err) => Err(err.into()),
        }
    }
}

/// Serialize a message as a single line (no trailing newline).
pub fn encode<T: Serialize>(message: &T) -> Result<String, CapabilityError> {
    serde_json::to_string(message)
        .map_err(|e| CapabilityError::IsolationFailed(format!("failed to encode message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_shape() {
        let id = Uuid::nil();
        let line = encode(&RequestEnvelope {
            id,
            request: IsolateRequest::Stats,
        })
        .unwrap();
        assert_eq!(
            line,
            r#"{"id":"00000000-0000-0000-0000-000000000000","request":{"type":"stats"}}"#
        );
        assert!(!line.contains('\n'));
    }

    #[test]
    fn process_request_keeps_text_newlines_escaped() {
        let line = encode(&RequestEnvelope {
            id: Uuid::new_v4(),
            request: IsolateRequest::Process {
                text: "line one\nline two".to_string(),
                config: CapabilityConfig::summarizing(),
                limits: ChunkLimits::default(),
            },
        })
        .unwrap();
        assert!(!line.contains('\n'));
        let back: RequestEnvelope = serde_json::from_str(&line).unwrap();
        assert!(matches!(
            back.request,
            IsolateRequest::Process { ref text, .. } if text == "line one\nline two"
        ));
    }

    #[test]
    fn errors_keep_their_kind_across_the_wire() {
        let errors = vec![
            CapabilityError::Unavailable("no model".into()),
            CapabilityError::DownloadPending("pulling".into()),
            CapabilityError::CreationFailed {
                attempts: 3,
                message: "crashed".into(),
            },
            CapabilityError::ProcessingFailed("bad input".into()),
            CapabilityError::Cancelled,
            CapabilityError::Shutdown,
        ];
        for err in errors {
            let envelope = ResponseEnvelope::new(Uuid::new_v4(), Err(err.clone()));
            let line = encode(&envelope).unwrap();
            let back: ResponseEnvelope = serde_json::from_str(&line).unwrap();
            assert_eq!(back.into_result().unwrap_err(), err);
        }
    }

    #[test]
    fn bad_request_becomes_isolation_failure() {
        let err: CapabilityError = WireError::bad_request("not json").into();
        assert!(matches!(err, CapabilityError::IsolationFailed(m) if m.contains("not json")));
    }
}
