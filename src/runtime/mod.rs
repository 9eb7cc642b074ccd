//! Host runtime abstraction.
//!
//! The inference engine is a black box: it can report availability, create a
//! capability session, and sessions can process text and be destroyed. Only
//! the session pool is allowed to call `create` and `destroy`; everything else
//! borrows sessions through a [`crate::pool::SessionLease`].
//!
//! # Object Safety
//! Both traits are object-safe and intended to be used as
//! `Arc<dyn HostRuntime>` / `Arc<dyn CapabilitySession>`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::capability::{Availability, CapabilityConfig};

#[cfg(test)]
pub mod fake;
pub mod local;

pub use local::{LocalServerConfig, LocalServerRuntime};

/// Failures reported by the host runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("model download pending: {0}")]
    DownloadPending(String),

    #[error("{0}")]
    Failed(String),

    /// The host process died or lost the session
    #[error("host crashed: {0}")]
    Crashed(String),
}

impl HostError {
    /// Whether a creation attempt that failed this way may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Failed(_) | HostError::Crashed(_))
    }
}

/// A live, configured instantiation of a capability.
#[async_trait]
pub trait CapabilitySession: Send + Sync {
    /// Process `text`, optionally with per-call context.
    async fn process(&self, text: &str, context: Option<&str>) -> Result<String, HostError>;

    /// Release the host resources held by this session.
    async fn destroy(&self) -> Result<(), HostError>;
}

/// The on-device inference engine.
#[async_trait]
pub trait HostRuntime: Send + Sync + 'static {
    /// Report whether sessions for `config` can be created.
    async fn availability(&self, config: &CapabilityConfig) -> Result<Availability, HostError>;

    /// Create a session for `config`.
    async fn create(&self, config: &CapabilityConfig)
        -> Result<Arc<dyn CapabilitySession>, HostError>;

    /// Get a description of this runtime for logging
    fn description(&self) -> String;
}
