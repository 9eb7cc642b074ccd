//! Pooled sessions and the leases that borrow them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::capability::{short_id_for, CapabilityKind};
use crate::error::{CapabilityError, Result};
use crate::runtime::CapabilitySession;

use super::stats::SessionStats;

/// A live host session plus the pool's bookkeeping for it.
pub(crate) struct PooledSession {
    pub(crate) key: String,
    /// Digest label used in logs and stats in place of `key`
    pub(crate) id: String,
    pub(crate) kind: CapabilityKind,
    pub(crate) session: Arc<dyn CapabilitySession>,
    created_at: Instant,
    created_wall: DateTime<Utc>,
    last_used_at: Mutex<Instant>,
    use_count: AtomicU64,
    /// Outstanding leases; only changed under the pool's map lock when taken
    leases: AtomicUsize,
}

impl PooledSession {
    pub(crate) fn new(key: String, kind: CapabilityKind, session: Arc<dyn CapabilitySession>) -> Self {
        let now = Instant::now();
        Self {
            id: short_id_for(kind, &key),
            key,
            kind,
            session,
            created_at: now,
            created_wall: Utc::now(),
            last_used_at: Mutex::new(now),
            use_count: AtomicU64::new(0),
            leases: AtomicUsize::new(0),
        }
    }

    pub(crate) fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used_at.lock().elapsed()
    }

    pub(crate) fn last_used_at(&self) -> Instant {
        *self.last_used_at.lock()
    }

    pub(crate) fn is_leased(&self) -> bool {
        self.leases.load(Ordering::SeqCst) > 0
    }

    /// Whether this session may be evicted under `idle_timeout`.
    pub(crate) fn is_idle(&self, idle_timeout: Duration) -> bool {
        !self.is_leased() && self.idle_for() > idle_timeout
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            kind: self.kind,
            id: self.id.clone(),
            created_at: self.created_wall,
            age_ms: self.created_at.elapsed().as_millis() as u64,
            idle_ms: self.idle_for().as_millis() as u64,
            use_count: self.use_count.load(Ordering::SeqCst),
            in_flight: self.leases.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("use_count", &self.use_count.load(Ordering::SeqCst))
            .field("leases", &self.leases.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Borrowed access to a pooled session.
///
/// A lease only exposes `process`; creating and destroying sessions is the
/// pool's job. The session is never evicted or destroyed while a lease on it
/// is alive. Dropping the lease returns it to the pool.
pub struct SessionLease {
    entry: Arc<PooledSession>,
    released: Arc<Notify>,
    process_timeout: Option<Duration>,
}

impl SessionLease {
    /// Take a lease on `entry`. Callers hold the pool's map lock.
    pub(crate) fn take(
        entry: Arc<PooledSession>,
        released: Arc<Notify>,
        process_timeout: Option<Duration>,
    ) -> Self {
        entry.leases.fetch_add(1, Ordering::SeqCst);
        entry.use_count.fetch_add(1, Ordering::SeqCst);
        entry.touch();
        Self {
            entry,
            released,
            process_timeout,
        }
    }

    pub fn key(&self) -> &str {
        &self.entry.key
    }

    /// Short label for the leased session, safe to log.
    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn kind(&self) -> CapabilityKind {
        self.entry.kind
    }

    /// Run one host `process` call on the leased session.
    ///
    /// Failures are surfaced as `ProcessingFailed` and never retried.
    pub async fn process(&self, text: &str, context: Option<&str>) -> Result<String> {
        self.entry.touch();
        let call = self.entry.session.process(text, context);

        let result = match self.process_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(CapabilityError::ProcessingFailed(format!(
                        "timed out after {}ms",
                        limit.as_millis()
                    )))
                }
            },
            None => call.await,
        };

        self.entry.touch();
        result.map_err(|e| {
            tracing::debug!("[pool] process failed on {}: {}", self.entry.id, e);
            CapabilityError::ProcessingFailed(e.to_string())
        })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.entry.touch();
        self.entry.leases.fetch_sub(1, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("id", &self.entry.id)
            .finish_non_exhaustive()
    }
}
