use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::protocol::{encode, IsolateRequest, IsolateResponse, RequestEnvelope, ResponseEnvelope};
use super::provision::{Link, Provisioner};
use crate::capability::CapabilityConfig;
use crate::chunking::ChunkLimits;
use crate::error::{CapabilityError, Result};
use crate::pool::PoolStats;

type Pending = DashMap<Uuid, oneshot::Sender<Result<IsolateResponse>>>;

/// One live link to a worker plus the requests waiting on it.
struct Connection {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Arc<Pending>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    _keepalive: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Connection {
    fn start(link: Link) -> Arc<Self> {
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(Self::reader_loop(link.incoming, pending.clone(), alive.clone()));

        Arc::new(Self {
            outgoing: link.outgoing,
            pending,
            alive,
            reader,
            _keepalive: Mutex::new(link.keepalive),
        })
    }

    /// Route responses to their callers; fail everything left when the worker
    /// goes away.
    async fn reader_loop(
        mut incoming: mpsc::UnboundedReceiver<String>,
        pending: Arc<Pending>,
        alive: Arc<AtomicBool>,
    ) {
        while let Some(line) = incoming.recv().await {
            let envelope: ResponseEnvelope = match serde_json::from_str(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("[isolate] Ignoring malformed response: {}", e);
                    continue;
                }
            };
            match pending.remove(&envelope.id) {
                Some((_, sender)) => {
                    let _ = sender.send(envelope.into_result());
                }
                None => tracing::debug!("[isolate] No caller waiting for {}", envelope.id),
            }
        }

        alive.store(false, Ordering::SeqCst);
        let ids: Vec<Uuid> = pending.iter().map(|entry| *entry.key()).collect();
        if !ids.is_empty() {
            tracing::warn!(
                "[isolate] Worker exited, failing {} pending request(s)",
                ids.len()
            );
        }
        for id in ids {
            if let Some((_, sender)) = pending.remove(&id) {
                let _ = sender.send(Err(worker_lost()));
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send `request` and wait for its response, forwarding cancellation.
    async fn call(&self, request: IsolateRequest, cancel: &CancellationToken) -> Result<IsolateResponse> {
        let id = Uuid::new_v4();
        let name = request.name();
        let line = encode(&RequestEnvelope { id, request })?;

        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(id, tx);
        // The reader marks the link dead before draining, so either it drains
        // this entry or we observe the flag here
        if !self.is_alive() || self.outgoing.send(line).is_err() {
            self.pending.remove(&id);
            return Err(worker_lost());
        }
        tracing::debug!("[isolate] -> {} {}", name, id);

        tokio::select! {
            result = &mut rx => return result.unwrap_or_else(|_| Err(worker_lost())),
            _ = cancel.cancelled() => {
                tracing::debug!("[isolate] Forwarding cancel for {}", id);
                if let Ok(line) = encode(&RequestEnvelope {
                    id: Uuid::new_v4(),
                    request: IsolateRequest::Cancel { target: id },
                }) {
                    let _ = self.outgoing.send(line);
                }
            }
        }

        rx.await.unwrap_or_else(|_| Err(worker_lost()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn worker_lost() -> CapabilityError {
    CapabilityError::IsolationFailed("isolated worker exited".to_string())
}

/// Runs pool and processor work in a separate execution context.
///
/// The context is provisioned on first use. Concurrent first calls wait on the
/// same provisioning lane instead of starting duplicates. If the worker dies,
/// every pending call fails with `IsolationFailed` and the next call
/// provisions a fresh worker.
pub struct IsolatedHost {
    provisioner: Arc<dyn Provisioner>,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
    provisions: AtomicUsize,
}

impl IsolatedHost {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            connection: tokio::sync::Mutex::new(None),
            provisions: AtomicUsize::new(0),
        }
    }

    /// How many times a worker has been provisioned.
    pub fn provision_count(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn description(&self) -> String {
        self.provisioner.description()
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.is_alive() {
                return Ok(conn.clone());
            }
            tracing::warn!("[isolate] Previous worker is gone, provisioning a new one");
        }

        tracing::info!("[isolate] Provisioning {}", self.provisioner.description());
        let link = self.provisioner.provision().await?;
        self.provisions.fetch_add(1, Ordering::SeqCst);

        let conn = Connection::start(link);
        *slot = Some(conn.clone());
        Ok(conn)
    }

    pub async fn run(&self, request: IsolateRequest) -> Result<IsolateResponse> {
        self.run_cancellable(request, &CancellationToken::new()).await
    }

    pub async fn run_cancellable(
        &self,
        request: IsolateRequest,
        cancel: &CancellationToken,
    ) -> Result<IsolateResponse> {
        if cancel.is_cancelled() {
            return Err(CapabilityError::Cancelled);
        }
        let conn = self.connection().await?;
        conn.call(request, cancel).await
    }

    pub async fn process(
        &self,
        text: &str,
        config: &CapabilityConfig,
        limits: ChunkLimits,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = IsolateRequest::Process {
            text: text.to_string(),
            config: config.clone(),
            limits,
        };
        match self.run_cancellable(request, cancel).await? {
            IsolateResponse::Output { text } => Ok(text),
            other => Err(unexpected(other)),
        }
    }

    pub async fn acquire_and_use(&self, config: &CapabilityConfig, text: &str) -> Result<String> {
        self.process(text, config, ChunkLimits::default(), &CancellationToken::new())
            .await
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        match self.run(IsolateRequest::Stats).await? {
            IsolateResponse::Stats { stats } => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    pub async fn destroy_all(&self) -> Result<usize> {
        match self.run(IsolateRequest::DestroyAll).await? {
            IsolateResponse::Destroyed { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    /// Ask a running worker to drain its pool and exit.
    ///
    /// Does nothing if no worker is running. Returns the number of sessions
    /// the worker destroyed.
    pub async fn shutdown(&self) -> Result<usize> {
        let conn = {
            let mut slot = self.connection.lock().await;
            match slot.take() {
                Some(conn) if conn.is_alive() => conn,
                _ => return Ok(0),
            }
        };

        tracing::info!("[isolate] Shutting down worker");
        match conn.call(IsolateRequest::Shutdown, &CancellationToken::new()).await? {
            IsolateResponse::Destroyed { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: IsolateResponse) -> CapabilityError {
    CapabilityError::IsolationFailed(format!("unexpected worker response: {:?}", response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::provision::{ProcessProvisioner, ThreadProvisioner};
    use crate::pool::{PoolConfig, SessionPool};
    use crate::processor::{ChunkProcessor, ProcessorConfig};
    use crate::runtime::fake::FakeRuntime;
    use async_trait::async_trait;
    use std::time::Duration;

    fn thread_host(runtime: Arc<FakeRuntime>, delay: Duration) -> IsolatedHost {
        let factory = Arc::new(move || {
            let pool = SessionPool::new(
                runtime.clone(),
                PoolConfig {
                    min_creation_interval: Duration::from_millis(5),
                    destroy_grace: Duration::ZERO,
                    ..Default::default()
                },
            );
            Ok::<_, anyhow::Error>(ChunkProcessor::new(
                pool,
                ProcessorConfig {
                    inter_chunk_delay: delay,
                    ..Default::default()
                },
            ))
        });
        IsolatedHost::new(Arc::new(ThreadProvisioner::new(factory)))
    }

    /// Hands out links whose worker side the test drives by hand.
    struct ManualProvisioner {
        workers: Mutex<Vec<(mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>)>>,
        count: AtomicUsize,
    }

    impl ManualProvisioner {
        fn new() -> Self {
            Self {
                workers: Mutex::new(Vec::new()),
                count: AtomicUsize::new(0),
            }
        }

        fn take_worker(&self) -> (mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>) {
            self.workers.lock().remove(0)
        }
    }

    #[async_trait]
    impl Provisioner for ManualProvisioner {
        async fn provision(&self) -> Result<Link> {
            self.count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            let (to_worker, worker_rx) = mpsc::unbounded_channel();
            let (worker_tx, from_worker) = mpsc::unbounded_channel();
            self.workers.lock().push((worker_rx, worker_tx));
            Ok(Link {
                outgoing: to_worker,
                incoming: from_worker,
                keepalive: None,
            })
        }

        fn description(&self) -> String {
            "manual".to_string()
        }
    }

    #[tokio::test]
    async fn process_runs_in_worker_thread() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.respond_with(|text| text.to_uppercase());
        let host = thread_host(runtime.clone(), Duration::ZERO);

        let out = host
            .acquire_and_use(&CapabilityConfig::prompting(), "quiet words")
            .await
            .unwrap();
        assert_eq!(out, "QUIET WORDS");

        let stats = host.stats().await.unwrap();
        assert_eq!(stats.session_count, 1);
        assert_eq!(host.provision_count(), 1);
    }

    #[tokio::test]
    async fn errors_cross_the_boundary_intact() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_availability(crate::capability::Availability::Unavailable);
        let host = thread_host(runtime, Duration::ZERO);

        let err = host
            .acquire_and_use(&CapabilityConfig::summarizing(), "text")
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
    }

    #[tokio::test]
    async fn concurrent_first_calls_provision_once() {
        let provisioner = Arc::new(ManualProvisioner::new());
        let host = Arc::new(IsolatedHost::new(provisioner.clone()));

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let host = host.clone();
                tokio::spawn(async move { host.stats().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provisioner.count.load(Ordering::SeqCst), 1);

        // Answer every request from the single worker
        let (mut worker_rx, worker_tx) = provisioner.take_worker();
        for _ in 0..4 {
            let line = worker_rx.recv().await.unwrap();
            let request: RequestEnvelope = serde_json::from_str(&line).unwrap();
            let response = ResponseEnvelope::new(
                request.id,
                Ok(IsolateResponse::Stats {
                    stats: PoolStats::default(),
                }),
            );
            worker_tx.send(encode(&response).unwrap()).unwrap();
        }
        for call in calls {
            assert!(call.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn worker_death_fails_pending_and_reprovisions() {
        let provisioner = Arc::new(ManualProvisioner::new());
        let host = Arc::new(IsolatedHost::new(provisioner.clone()));

        let pending = {
            let host = host.clone();
            tokio::spawn(async move {
                host.acquire_and_use(&CapabilityConfig::prompting(), "text")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The worker reads the request, then dies without answering
        let (mut worker_rx, worker_tx) = provisioner.take_worker();
        assert!(worker_rx.recv().await.is_some());
        drop(worker_tx);
        drop(worker_rx);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CapabilityError::IsolationFailed(_)));

        let next = {
            let host = host.clone();
            tokio::spawn(async move { host.destroy_all().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provisioner.count.load(Ordering::SeqCst), 2);

        let (mut worker_rx, worker_tx) = provisioner.take_worker();
        let line = worker_rx.recv().await.unwrap();
        let request: RequestEnvelope = serde_json::from_str(&line).unwrap();
        worker_tx
            .send(
                encode(&ResponseEnvelope::new(
                    request.id,
                    Ok(IsolateResponse::Destroyed { count: 0 }),
                ))
                .unwrap(),
            )
            .unwrap();
        assert_eq!(next.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn cancellation_is_forwarded_to_worker() {
        let runtime = Arc::new(FakeRuntime::new());
        let host = thread_host(runtime.clone(), Duration::from_millis(300));
        let cancel = CancellationToken::new();

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            })
        };
        let err = host
            .process(
                &"x".repeat(4000),
                &CapabilityConfig::prompting(),
                ChunkLimits::new(1000, 200),
                &cancel,
            )
            .await
            .unwrap_err();
        trigger.await.unwrap();

        assert_eq!(err, CapabilityError::Cancelled);
        assert_eq!(runtime.process_calls().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_worker_pool() {
        let runtime = Arc::new(FakeRuntime::new());
        let host = thread_host(runtime.clone(), Duration::ZERO);
        host.acquire_and_use(&CapabilityConfig::prompting(), "a")
            .await
            .unwrap();
        host.acquire_and_use(&CapabilityConfig::summarizing(), "b")
            .await
            .unwrap();

        assert_eq!(host.shutdown().await.unwrap(), 2);
        assert_eq!(runtime.destroyed_keys().len(), 2);
        // Nothing left to shut down
        assert_eq!(host.shutdown().await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dying_worker_process_fails_pending_request() {
        let provisioner = ProcessProvisioner::new(
            "sh",
            vec!["-c".to_string(), "read line; exit 0".to_string()],
        );
        let host = IsolatedHost::new(Arc::new(provisioner));

        let err = host.stats().await.unwrap_err();
        assert!(matches!(err, CapabilityError::IsolationFailed(_)));
    }
}
