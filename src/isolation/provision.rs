//! Ways of standing up the isolated context.

use std::any::Any;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use super::worker;
use crate::error::{CapabilityError, Result};
use crate::processor::ChunkProcessor;

/// Line channels to a freshly provisioned worker.
pub struct Link {
    /// Request lines to the worker
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Response lines from the worker; closes when the worker dies
    pub incoming: mpsc::UnboundedReceiver<String>,
    /// Kept alive for as long as the connection is (e.g. the child process)
    pub keepalive: Option<Box<dyn Any + Send>>,
}

/// Creates isolated worker contexts.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    async fn provision(&self) -> Result<Link>;

    fn description(&self) -> String;
}

/// Builds the worker's processor inside the worker's own runtime.
pub type ProcessorFactory = Arc<dyn Fn() -> anyhow::Result<ChunkProcessor> + Send + Sync>;

/// Runs the worker on a dedicated OS thread with its own single-threaded
/// Tokio runtime, host runtime, pool and processor.
pub struct ThreadProvisioner {
    factory: ProcessorFactory,
}

impl ThreadProvisioner {
    pub fn new(factory: ProcessorFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Provisioner for ThreadProvisioner {
    async fn provision(&self) -> Result<Link> {
        let (to_worker, worker_rx) = mpsc::unbounded_channel::<String>();
        let (worker_tx, from_worker) = mpsc::unbounded_channel::<String>();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();
        let factory = self.factory.clone();

        std::thread::Builder::new()
            .name("pagewise-isolate".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to build runtime: {}", e)));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let processor = match factory() {
                        Ok(processor) => processor,
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    worker::serve(processor, worker_rx, worker_tx).await;
                });
            })
            .map_err(|e| {
                CapabilityError::IsolationFailed(format!("failed to spawn worker thread: {}", e))
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {
                tracing::info!("[isolate] Worker thread started");
                Ok(Link {
                    outgoing: to_worker,
                    incoming: from_worker,
                    keepalive: None,
                })
            }
            Ok(Err(reason)) => Err(CapabilityError::IsolationFailed(reason)),
            Err(_) => Err(CapabilityError::IsolationFailed(
                "worker thread exited during startup".to_string(),
            )),
        }
    }

    fn description(&self) -> String {
        "worker thread".to_string()
    }
}

/// Runs the worker as a child process speaking JSON lines on stdin/stdout.
pub struct ProcessProvisioner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessProvisioner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable with `args` (normally `worker ...`).
    pub fn current_exe(args: Vec<String>) -> anyhow::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, args))
    }
}

#[async_trait]
impl Provisioner for ProcessProvisioner {
    async fn provision(&self) -> Result<Link> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CapabilityError::IsolationFailed(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(CapabilityError::IsolationFailed(
                "worker process has no stdio pipes".to_string(),
            ));
        };

        let (to_worker, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (incoming_tx, from_worker) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(line) = outgoing_rx.recv().await {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = written.await {
                    tracing::warn!("[isolate] Worker stdin closed: {}", e);
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if incoming_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("[isolate] Worker stdout read error: {}", e);
                        break;
                    }
                }
            }
        });

        tracing::info!(
            "[isolate] Worker process started (pid {:?})",
            child.id()
        );
        Ok(Link {
            outgoing: to_worker,
            incoming: from_worker,
            keepalive: Some(Box::new(child)),
        })
    }

    fn description(&self) -> String {
        format!("worker process {}", self.program.display())
    }
}
