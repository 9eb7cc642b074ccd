//! Scripted in-memory runtime for tests.
//!
//! Records every host call with a timestamp and can simulate slow creation,
//! creation failures, processing failures and failing destroys.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CapabilitySession, HostError, HostRuntime};
use crate::capability::{Availability, CapabilityConfig};

#[derive(Debug, Clone)]
pub enum HostCall {
    Create { key: String, at: Instant },
    Process {
        key: String,
        text: String,
        context: Option<String>,
        started: Instant,
        finished: Instant,
    },
    Destroy { key: String, at: Instant },
}

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub struct FakeRuntime {
    calls: Arc<Mutex<Vec<HostCall>>>,
    availability: Mutex<Availability>,
    create_delay: Mutex<Duration>,
    process_delay: Mutex<Duration>,
    /// Number of upcoming create calls that fail
    failing_creates: AtomicU32,
    /// Returned by every create call while set
    create_refusal: Mutex<Option<HostError>>,
    /// Zero-based index of the process call that fails, if any
    failing_process: Mutex<Option<usize>>,
    failing_destroy: Arc<AtomicBool>,
    process_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    responder: Mutex<Responder>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            availability: Mutex::new(Availability::Available),
            create_delay: Mutex::new(Duration::ZERO),
            process_delay: Mutex::new(Duration::ZERO),
            failing_creates: AtomicU32::new(0),
            create_refusal: Mutex::new(None),
            failing_process: Mutex::new(None),
            failing_destroy: Arc::new(AtomicBool::new(false)),
            process_count: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            responder: Mutex::new(Arc::new(|text: &str| text.to_string())),
        }
    }

    pub fn set_availability(&self, availability: Availability) {
        *self.availability.lock() = availability;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = delay;
    }

    pub fn set_process_delay(&self, delay: Duration) {
        *self.process_delay.lock() = delay;
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    pub fn refuse_creates(&self, error: HostError) {
        *self.create_refusal.lock() = Some(error);
    }

    pub fn fail_process_call(&self, index: usize) {
        *self.failing_process.lock() = Some(index);
    }

    pub fn fail_destroys(&self, fail: bool) {
        self.failing_destroy.store(fail, Ordering::SeqCst);
    }

    pub fn respond_with(&self, responder: impl Fn(&str) -> String + Send + Sync + 'static) {
        *self.responder.lock() = Arc::new(responder);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn create_times(&self) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Create { at, .. } => Some(at),
                _ => None,
            })
            .collect()
    }

    pub fn create_count(&self) -> usize {
        self.create_times().len()
    }

    pub fn process_calls(&self) -> Vec<(String, Option<String>, Instant, Instant)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Process {
                    text,
                    context,
                    started,
                    finished,
                    ..
                } => Some((text, context, started, finished)),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Destroy { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Highest number of process calls observed running at the same time.
    pub fn max_concurrent_process(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostRuntime for FakeRuntime {
    async fn availability(&self, _config: &CapabilityConfig) -> Result<Availability, HostError> {
        Ok(*self.availability.lock())
    }

    async fn create(
        &self,
        config: &CapabilityConfig,
    ) -> Result<Arc<dyn CapabilitySession>, HostError> {
        let key = config.key();
        self.calls.lock().push(HostCall::Create {
            key: key.clone(),
            at: Instant::now(),
        });

        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.create_refusal.lock().clone() {
            return Err(error);
        }

        let should_fail = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(HostError::Crashed("simulated create crash".to_string()));
        }

        Ok(Arc::new(FakeSession {
            key,
            runtime_calls: self.calls.clone(),
            process_delay: *self.process_delay.lock(),
            failing_process: *self.failing_process.lock(),
            failing_destroy: self.failing_destroy.clone(),
            process_count: self.process_count.clone(),
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
            responder: self.responder.lock().clone(),
            destroyed: AtomicBool::new(false),
        }))
    }

    fn description(&self) -> String {
        "Fake runtime".to_string()
    }
}

struct FakeSession {
    key: String,
    runtime_calls: Arc<Mutex<Vec<HostCall>>>,
    process_delay: Duration,
    failing_process: Option<usize>,
    failing_destroy: Arc<AtomicBool>,
    process_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    responder: Responder,
    destroyed: AtomicBool,
}

#[async_trait]
impl CapabilitySession for FakeSession {
    async fn process(&self, text: &str, context: Option<&str>) -> Result<String, HostError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(HostError::Failed("session destroyed".to_string()));
        }

        let index = self.process_count.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let started = Instant::now();
        if !self.process_delay.is_zero() {
            tokio::time::sleep(self.process_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.runtime_calls.lock().push(HostCall::Process {
            key: self.key.clone(),
            text: text.to_string(),
            context: context.map(str::to_string),
            started,
            finished: Instant::now(),
        });

        if self.failing_process == Some(index) {
            return Err(HostError::Failed("simulated inference failure".to_string()));
        }
        Ok((self.responder)(text))
    }

    async fn destroy(&self) -> Result<(), HostError> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.runtime_calls.lock().push(HostCall::Destroy {
            key: self.key.clone(),
            at: Instant::now(),
        });
        if self.failing_destroy.load(Ordering::SeqCst) {
            return Err(HostError::Failed("simulated destroy failure".to_string()));
        }
        Ok(())
    }
}
