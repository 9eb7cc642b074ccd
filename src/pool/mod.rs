//! Bounded pool of host capability sessions.
//!
//! Sessions are keyed by [`CapabilityConfig`] and reused across calls. A hit
//! is served straight from the map. Every miss goes through a single FIFO
//! creation lane, so each miss observes the bookkeeping of the ones before it:
//!
//! ```text
//! acquire(config)
//!   +-- hit ----------------------------------------------> lease
//!   +-- miss -> creation lane
//!                 recheck map -> sweep idle -> make room (LRU)
//!                 -> availability probe -> wait min interval
//!                 -> create (+retries) -> insert ---------> lease
//! ```
//!
//! # Invariants
//!
//! - At most `max_sessions` sessions are live.
//! - No two host `create` calls start closer than `min_creation_interval`.
//! - A session with an outstanding [`SessionLease`] is never destroyed.
//! - Only the pool calls `create` and `destroy` on the host runtime.

mod lease;
mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capability::{Availability, CapabilityConfig};
use crate::error::{CapabilityError, Result};
use crate::runtime::{CapabilitySession, HostError, HostRuntime};

pub use lease::SessionLease;
use lease::PooledSession;
pub use stats::{PoolStats, SessionStats};

/// Maximum live sessions (default)
pub const DEFAULT_MAX_SESSIONS: usize = 3;

/// Idle sessions are evicted after 5 minutes (default)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5 * 60;

/// Pool limits and host timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_sessions: usize,
    /// Minimum spacing between host `create` calls
    pub min_creation_interval: Duration,
    pub idle_timeout: Duration,
    /// Delay between removing a session and destroying it
    pub destroy_grace: Duration,
    /// Extra create attempts after the first one fails
    pub create_retries: u32,
    pub create_backoff: Duration,
    pub availability_timeout: Duration,
    pub create_timeout: Duration,
    /// Local cap on a single `process` call; `None` defers to the host
    pub process_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            min_creation_interval: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            destroy_grace: Duration::from_millis(200),
            create_retries: 2,
            create_backoff: Duration::from_millis(2000),
            availability_timeout: Duration::from_secs(5),
            create_timeout: Duration::from_secs(15),
            process_timeout: None,
        }
    }
}

/// State owned by the creation lane
#[derive(Debug, Default)]
struct Lane {
    last_create_attempt: Option<Instant>,
}

struct PoolInner {
    runtime: Arc<dyn HostRuntime>,
    config: PoolConfig,
    sessions: Mutex<HashMap<String, Arc<PooledSession>>>,
    lane: tokio::sync::Mutex<Lane>,
    lease_released: Arc<Notify>,
    closed: AtomicBool,
}

/// Resource-bounded session pool over a [`HostRuntime`].
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(runtime: Arc<dyn HostRuntime>, mut config: PoolConfig) -> Self {
        config.max_sessions = config.max_sessions.max(1);
        tracing::info!(
            "[pool] Created (max_sessions={}, runtime={})",
            config.max_sessions,
            runtime.description()
        );
        Self {
            inner: Arc::new(PoolInner {
                runtime,
                config,
                sessions: Mutex::new(HashMap::new()),
                lane: tokio::sync::Mutex::new(Lane::default()),
                lease_released: Arc::new(Notify::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn runtime(&self) -> &Arc<dyn HostRuntime> {
        &self.inner.runtime
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Borrow a session for `config`, creating one if needed.
    pub async fn acquire(&self, config: &CapabilityConfig) -> Result<SessionLease> {
        self.ensure_open()?;
        let key = config.key();

        if let Some(lease) = self.try_reuse(&key) {
            tracing::debug!("[pool] Reusing session {}", lease.id());
            return Ok(lease);
        }

        let mut lane = self.inner.lane.lock().await;
        self.ensure_open()?;

        // A miss queued ahead of us may have created it
        if let Some(lease) = self.try_reuse(&key) {
            tracing::debug!("[pool] Reusing session {} created while queued", lease.id());
            return Ok(lease);
        }

        self.evict_idle().await;
        self.make_room().await?;
        self.probe(config).await?;
        let session = self.create_with_retry(config, &mut lane).await?;

        let entry = Arc::new(PooledSession::new(key.clone(), config.kind, session));
        let lease = {
            let mut sessions = self.inner.sessions.lock();
            sessions.insert(key, entry.clone());
            self.lease(entry)
        };
        tracing::info!("[pool] Session created: {} ({} live)", lease.id(), self.count());
        Ok(lease)
    }

    /// Evict sessions idle longer than the idle timeout.
    ///
    /// Returns the number of sessions evicted.
    pub async fn sweep_idle(&self) -> usize {
        let _lane = self.inner.lane.lock().await;
        self.evict_idle().await
    }

    /// Periodically sweep idle sessions until `cancel` fires.
    pub fn spawn_reaper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            tracing::debug!("[pool] Reaper started (every {}s)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if pool.is_closed() {
                            break;
                        }
                        let evicted = pool.sweep_idle().await;
                        if evicted > 0 {
                            tracing::info!("[pool] Reaper evicted {} idle session(s)", evicted);
                        }
                    }
                }
            }
            tracing::debug!("[pool] Reaper stopped");
        })
    }

    /// Close the pool and destroy every session.
    ///
    /// Waits for outstanding leases to be returned first. Destroy failures are
    /// logged and swallowed. Returns the number of destroy attempts.
    pub async fn destroy_all(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        // Wake acquires waiting for capacity so they observe the shutdown
        self.inner.lease_released.notify_waiters();

        let _lane = self.inner.lane.lock().await;
        let drained = self.drain_when_unleased().await;
        let count = drained.len();
        tracing::info!("[pool] Destroying {} session(s)", count);

        join_all(drained.into_iter().map(|entry| self.destroy_after_grace(entry))).await;
        count
    }

    pub fn stats(&self) -> PoolStats {
        let sessions = self.inner.sessions.lock();
        let mut list: Vec<SessionStats> = sessions.values().map(|e| e.stats()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        PoolStats {
            session_count: list.len(),
            max_sessions: self.inner.config.max_sessions,
            sessions: list,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CapabilityError::Shutdown);
        }
        Ok(())
    }

    /// Take a lease on `entry`; caller holds the map lock.
    fn lease(&self, entry: Arc<PooledSession>) -> SessionLease {
        SessionLease::take(
            entry,
            self.inner.lease_released.clone(),
            self.inner.config.process_timeout,
        )
    }

    fn try_reuse(&self, key: &str) -> Option<SessionLease> {
        let sessions = self.inner.sessions.lock();
        if self.is_closed() {
            return None;
        }
        sessions.get(key).cloned().map(|entry| self.lease(entry))
    }

    /// Remove and destroy every lease-free session past the idle timeout.
    async fn evict_idle(&self) -> usize {
        let idle_timeout = self.inner.config.idle_timeout;
        let evicted: Vec<Arc<PooledSession>> = {
            let mut sessions = self.inner.sessions.lock();
            let keys: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.is_idle(idle_timeout))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };

        let count = evicted.len();
        for entry in &evicted {
            tracing::info!(
                "[pool] Evicting idle session {} (idle {}ms)",
                entry.id,
                entry.idle_for().as_millis()
            );
        }
        join_all(evicted.into_iter().map(|entry| self.destroy_after_grace(entry))).await;
        count
    }

    /// Evict the least recently used lease-free session until there is room.
    /// Waits for a lease to come back when every session is in use.
    async fn make_room(&self) -> Result<()> {
        let mut logged_wait = false;
        loop {
            let released = self.inner.lease_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let victim = {
                let mut sessions = self.inner.sessions.lock();
                if sessions.len() < self.inner.config.max_sessions {
                    return Ok(());
                }
                let lru = sessions
                    .values()
                    .filter(|entry| !entry.is_leased())
                    .min_by_key(|entry| entry.last_used_at())
                    .map(|entry| entry.key.clone());
                lru.and_then(|key| sessions.remove(&key))
            };

            if let Some(entry) = victim {
                tracing::info!("[pool] At capacity, evicting LRU session {}", entry.id);
                self.destroy_after_grace(entry).await;
                continue;
            }

            self.ensure_open()?;
            if !logged_wait {
                tracing::debug!("[pool] At capacity with every session leased, waiting");
                logged_wait = true;
            }
            released.await;
        }
    }

    /// Empty the map once no entry is leased. The check and the drain share
    /// one map lock scope so a hit cannot slip a lease in between.
    async fn drain_when_unleased(&self) -> Vec<Arc<PooledSession>> {
        loop {
            let released = self.inner.lease_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut sessions = self.inner.sessions.lock();
                if !sessions.values().any(|entry| entry.is_leased()) {
                    return sessions.drain().map(|(_, entry)| entry).collect();
                }
            }
            tracing::debug!("[pool] Waiting for outstanding leases");
            released.await;
        }
    }

    async fn probe(&self, config: &CapabilityConfig) -> Result<()> {
        let limit = self.inner.config.availability_timeout;
        let probe = self.inner.runtime.availability(config);

        match tokio::time::timeout(limit, probe).await {
            Ok(Ok(Availability::Unavailable)) => Err(CapabilityError::Unavailable(format!(
                "{} is not available on this device",
                config.kind
            ))),
            Ok(Ok(Availability::Downloading)) => Err(CapabilityError::DownloadPending(format!(
                "model for {} is downloading",
                config.kind
            ))),
            Ok(Ok(Availability::Downloadable | Availability::Available)) => Ok(()),
            Ok(Err(e)) => Err(refusal(e, 0)),
            Err(_) => Err(CapabilityError::CreationFailed {
                attempts: 0,
                message: format!("availability check timed out after {}ms", limit.as_millis()),
            }),
        }
    }

    /// Sleep until `min_creation_interval` has passed since the last attempt.
    async fn wait_creation_interval(&self, lane: &Lane) {
        if let Some(last) = lane.last_create_attempt {
            let elapsed = last.elapsed();
            let interval = self.inner.config.min_creation_interval;
            if elapsed < interval {
                let wait = interval - elapsed;
                tracing::debug!("[pool] Rate limiting create for {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }
    }

    async fn create_with_retry(
        &self,
        config: &CapabilityConfig,
        lane: &mut Lane,
    ) -> Result<Arc<dyn CapabilitySession>> {
        let cfg = &self.inner.config;
        let attempts = cfg.create_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(cfg.create_backoff).await;
            }
            self.wait_creation_interval(lane).await;
            lane.last_create_attempt = Some(Instant::now());

            let create = self.inner.runtime.create(config);
            match tokio::time::timeout(cfg.create_timeout, create).await {
                Ok(Ok(session)) => return Ok(session),
                Ok(Err(e)) if e.is_transient() => last_error = e.to_string(),
                Ok(Err(e)) => return Err(refusal(e, attempt)),
                Err(_) => {
                    last_error = format!("create timed out after {}ms", cfg.create_timeout.as_millis())
                }
            }
            tracing::warn!(
                "[pool] Create attempt {}/{} for {} failed: {}",
                attempt,
                attempts,
                config.kind,
                last_error
            );
        }

        Err(CapabilityError::CreationFailed {
            attempts,
            message: last_error,
        })
    }

    async fn destroy_after_grace(&self, entry: Arc<PooledSession>) {
        let grace = self.inner.config.destroy_grace;
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        match entry.session.destroy().await {
            Ok(()) => tracing::debug!("[pool] Destroyed session {}", entry.id),
            Err(e) => tracing::warn!("[pool] Failed to destroy session {}: {}", entry.id, e),
        }
    }
}

/// Map a host error that ends creation; unexpected kinds become `CreationFailed`.
fn refusal(e: HostError, attempts: u32) -> CapabilityError {
    match e {
        HostError::Unavailable(msg) => CapabilityError::Unavailable(msg),
        HostError::DownloadPending(msg) => CapabilityError::DownloadPending(msg),
        other => CapabilityError::CreationFailed {
            attempts,
            message: other.to_string(),
        },
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.inner.config)
            .field("sessions", &self.count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
