use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;

/// Snapshot of one pooled session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub kind: CapabilityKind,
    /// Kind plus a digest of the canonical options
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub use_count: u64,
    /// Leases currently outstanding
    pub in_flight: usize,
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub session_count: usize,
    pub max_sessions: usize,
    pub sessions: Vec<SessionStats>,
}

impl PoolStats {
    pub fn total_uses(&self) -> u64 {
        self.sessions.iter().map(|s| s.use_count).sum()
    }
}
