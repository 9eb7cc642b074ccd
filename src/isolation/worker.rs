//! The isolated side: a request loop in front of its own pool and processor.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::protocol::{
    encode, IsolateRequest, IsolateResponse, Outcome, RequestEnvelope, ResponseEnvelope,
    WireError,
};
use crate::error::CapabilityError;
use crate::processor::ChunkProcessor;

/// Serve requests arriving on `incoming` until `Shutdown` or until the
/// primary side goes away. Either way the pool is drained before returning.
pub async fn serve(
    processor: ChunkProcessor,
    mut incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
) {
    let in_flight: Arc<DashMap<Uuid, CancellationToken>> = Arc::new(DashMap::new());
    tracing::info!("[isolate] Worker ready");

    while let Some(line) = incoming.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let envelope: RequestEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("[isolate] Dropping malformed request: {}", e);
                reply_bad_request(line, &e.to_string(), &outgoing);
                continue;
            }
        };

        let id = envelope.id;
        tracing::debug!("[isolate] <- {} {}", envelope.request.name(), id);

        match envelope.request {
            IsolateRequest::Process {
                text,
                config,
                limits,
            } => {
                let cancel = CancellationToken::new();
                in_flight.insert(id, cancel.clone());

                let processor = processor.clone();
                let outgoing = outgoing.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    let job = tokio::spawn(async move {
                        processor.process(&text, &config, limits, &cancel).await
                    });
                    let result = match job.await {
                        Ok(result) => result.map(|text| IsolateResponse::Output { text }),
                        Err(e) => Err(CapabilityError::ProcessingFailed(format!(
                            "worker task failed: {}",
                            e
                        ))),
                    };
                    in_flight.remove(&id);
                    send(&outgoing, ResponseEnvelope::new(id, result));
                });
            }
            IsolateRequest::Stats => {
                let stats = processor.pool().stats();
                send(&outgoing, ResponseEnvelope::new(id, Ok(IsolateResponse::Stats { stats })));
            }
            IsolateRequest::DestroyAll => {
                let pool = processor.pool().clone();
                let outgoing = outgoing.clone();
                tokio::spawn(async move {
                    let count = pool.destroy_all().await;
                    send(&outgoing, ResponseEnvelope::new(id, Ok(IsolateResponse::Destroyed { count })));
                });
            }
            IsolateRequest::Cancel { target } => {
                if let Some(token) = in_flight.get(&target) {
                    tracing::debug!("[isolate] Cancelling {}", target);
                    token.cancel();
                }
            }
            IsolateRequest::Shutdown => {
                cancel_all(&in_flight);
                let count = processor.pool().destroy_all().await;
                send(&outgoing, ResponseEnvelope::new(id, Ok(IsolateResponse::Destroyed { count })));
                tracing::info!("[isolate] Worker shut down");
                return;
            }
        }
    }

    tracing::info!("[isolate] Primary side closed, draining pool");
    cancel_all(&in_flight);
    processor.pool().destroy_all().await;
}

/// Run [`serve`] over this process's stdin/stdout.
///
/// Stdout carries only protocol lines; logs must go to stderr.
pub async fn serve_stdio(processor: ChunkProcessor) -> std::io::Result<()> {
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if in_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("[isolate] stdin read error: {}", e);
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    serve(processor, in_rx, out_tx).await;
    reader.abort();

    match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
    }
}

fn cancel_all(in_flight: &DashMap<Uuid, CancellationToken>) {
    for entry in in_flight.iter() {
        entry.value().cancel();
    }
}

fn send(outgoing: &mpsc::UnboundedSender<String>, envelope: ResponseEnvelope) {
    match encode(&envelope) {
        Ok(line) => {
            if outgoing.send(line).is_err() {
                tracing::debug!("[isolate] Primary side gone, dropping response {}", envelope.id);
            }
        }
        Err(e) => tracing::warn!("[isolate] {}", e),
    }
}

/// Answer an unparseable request if its id can still be recovered.
fn reply_bad_request(line: &str, reason: &str, outgoing: &mpsc::UnboundedSender<String>) {
    let id = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .and_then(|id| Uuid::parse_str(&id).ok());

    if let Some(id) = id {
        let envelope = ResponseEnvelope {
            id,
            outcome: Outcome::Err(WireError::bad_request(reason)),
        };
        send(outgoing, envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityConfig;
    use crate::chunking::ChunkLimits;
    use crate::pool::{PoolConfig, SessionPool};
    use crate::processor::ProcessorConfig;
    use crate::runtime::fake::FakeRuntime;
    use std::time::Duration;

    struct Harness {
        runtime: Arc<FakeRuntime>,
        to_worker: mpsc::UnboundedSender<String>,
        from_worker: mpsc::UnboundedReceiver<String>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start() -> Harness {
        let runtime = Arc::new(FakeRuntime::new());
        let pool = SessionPool::new(
            runtime.clone(),
            PoolConfig {
                destroy_grace: Duration::ZERO,
                ..Default::default()
            },
        );
        let processor = ChunkProcessor::new(
            pool,
            ProcessorConfig {
                inter_chunk_delay: Duration::from_millis(200),
                ..Default::default()
            },
        );
        let (to_worker, in_rx) = mpsc::unbounded_channel();
        let (out_tx, from_worker) = mpsc::unbounded_channel();
        let handle = tokio::spawn(serve(processor, in_rx, out_tx));
        Harness {
            runtime,
            to_worker,
            from_worker,
            handle,
        }
    }

    fn request(id: Uuid, request: IsolateRequest) -> String {
        encode(&RequestEnvelope { id, request }).unwrap()
    }

    async fn next_response(h: &mut Harness) -> ResponseEnvelope {
        let line = h.from_worker.recv().await.expect("worker response");
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn process_request_round_trips() {
        let mut h = start();
        let id = Uuid::new_v4();
        h.to_worker
            .send(request(
                id,
                IsolateRequest::Process {
                    text: "hello".to_string(),
                    config: CapabilityConfig::prompting(),
                    limits: ChunkLimits::default(),
                },
            ))
            .unwrap();

        let response = next_response(&mut h).await;
        assert_eq!(response.id, id);
        assert_eq!(
            response.into_result().unwrap(),
            IsolateResponse::Output {
                text: "hello".to_string()
            }
        );
        assert_eq!(h.runtime.create_count(), 1);
    }

    #[tokio::test]
    async fn cancel_stops_a_chunked_request() {
        let mut h = start();
        let id = Uuid::new_v4();
        h.to_worker
            .send(request(
                id,
                IsolateRequest::Process {
                    text: "x".repeat(4000),
                    config: CapabilityConfig::prompting(),
                    limits: ChunkLimits::new(1000, 200),
                },
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.to_worker
            .send(request(Uuid::new_v4(), IsolateRequest::Cancel { target: id }))
            .unwrap();

        let response = next_response(&mut h).await;
        assert_eq!(response.id, id);
        assert_eq!(response.into_result().unwrap_err(), CapabilityError::Cancelled);
        assert_eq!(h.runtime.process_calls().len(), 1);
    }

    #[tokio::test]
    async fn malformed_request_with_id_gets_bad_request() {
        let mut h = start();
        let id = Uuid::new_v4();
        h.to_worker
            .send(format!(r#"{{"id":"{}","request":{{"type":"nope"}}}}"#, id))
            .unwrap();

        let response = next_response(&mut h).await;
        assert_eq!(response.id, id);
        assert!(matches!(
            response.into_result().unwrap_err(),
            CapabilityError::IsolationFailed(_)
        ));
    }

    #[tokio::test]
    async fn shutdown_drains_pool_and_exits() {
        let mut h = start();
        h.to_worker
            .send(request(
                Uuid::new_v4(),
                IsolateRequest::Process {
                    text: "warm up".to_string(),
                    config: CapabilityConfig::summarizing(),
                    limits: ChunkLimits::default(),
                },
            ))
            .unwrap();
        next_response(&mut h).await;

        let id = Uuid::new_v4();
        h.to_worker.send(request(id, IsolateRequest::Shutdown)).unwrap();
        let response = next_response(&mut h).await;
        assert_eq!(
            response.into_result().unwrap(),
            IsolateResponse::Destroyed { count: 1 }
        );
        h.handle.await.unwrap();
        assert_eq!(h.runtime.destroyed_keys().len(), 1);
    }

    #[tokio::test]
    async fn closed_channel_drains_pool() {
        let mut h = start();
        h.to_worker
            .send(request(
                Uuid::new_v4(),
                IsolateRequest::Process {
                    text: "warm up".to_string(),
                    config: CapabilityConfig::prompting(),
                    limits: ChunkLimits::default(),
                },
            ))
            .unwrap();
        next_response(&mut h).await;

        drop(h.to_worker);
        h.handle.await.unwrap();
        assert_eq!(h.runtime.destroyed_keys().len(), 1);
    }
}
