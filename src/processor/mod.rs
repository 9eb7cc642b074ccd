//! Backpressure-aware processing of arbitrarily long text.
//!
//! Input that fits the window is one host call. Longer input is planned into
//! overlapping chunks which run strictly one after another on a single lease,
//! with a pause between calls so the host is never flooded. Chunk results are
//! folded with a blank line; if the fold is still oversized it gets exactly one
//! more pass on the same lease and that result is returned as-is.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityConfig;
use crate::chunking::{estimate_size, plan_chunks, ChunkLimits};
use crate::error::{CapabilityError, Result};
use crate::pool::SessionPool;
use crate::prompts;

/// Pause between chunk calls (default)
pub const DEFAULT_INTER_CHUNK_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub inter_chunk_delay: Duration,
    /// Limits used by `acquire_and_use`
    pub default_limits: ChunkLimits,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            inter_chunk_delay: Duration::from_millis(DEFAULT_INTER_CHUNK_DELAY_MS),
            default_limits: ChunkLimits::default(),
        }
    }
}

/// Runs text through pooled sessions, chunking when needed.
#[derive(Debug, Clone)]
pub struct ChunkProcessor {
    pool: SessionPool,
    config: ProcessorConfig,
}

impl ChunkProcessor {
    pub fn new(pool: SessionPool, config: ProcessorConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process `text` with default limits and no cancellation.
    pub async fn acquire_and_use(&self, config: &CapabilityConfig, text: &str) -> Result<String> {
        let cancel = CancellationToken::new();
        self.process(text, config, self.config.default_limits, &cancel)
            .await
    }

    /// Process `text` with a session for `config`.
    ///
    /// Cancellation is observed before acquiring, before every chunk, during
    /// pauses and before the fold pass. A host call already running is allowed
    /// to finish; its result is discarded.
    pub async fn process(
        &self,
        text: &str,
        config: &CapabilityConfig,
        limits: ChunkLimits,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let limits = limits.clamped();
        check_cancelled(cancel)?;

        if limits.fits(text) {
            let lease = self.pool.acquire(config).await?;
            check_cancelled(cancel)?;
            return lease.process(text, None).await;
        }

        let plan = plan_chunks(text, limits);
        let total = plan.len();
        tracing::info!(
            "[chunker] Processing {} chars as {} chunks for {}",
            estimate_size(text),
            total,
            config.kind
        );

        let lease = self.pool.acquire(config).await?;
        let mut results = Vec::with_capacity(total);

        for chunk in &plan.chunks {
            if chunk.index > 0 {
                self.pause(cancel).await?;
            }
            check_cancelled(cancel)?;

            let note = prompts::chunk_context(chunk.index, total);
            let output = lease.process(&chunk.text, Some(&note)).await?;
            tracing::debug!(
                "[chunker] Chunk {}/{} done ({} -> {} chars)",
                chunk.index + 1,
                total,
                estimate_size(&chunk.text),
                estimate_size(&output)
            );
            results.push(output);
        }

        let folded = results.join("\n\n");
        if limits.fits(&folded) {
            return Ok(folded);
        }

        check_cancelled(cancel)?;
        tracing::info!(
            "[chunker] Folded result is {} chars, running one more pass",
            estimate_size(&folded)
        );
        let output = lease
            .process(&folded, Some(&prompts::fold_context(total)))
            .await?;

        if !limits.fits(&output) {
            tracing::warn!(
                "[chunker] Fold pass still exceeds {} chars ({}), returning as-is",
                limits.max_input_size,
                estimate_size(&output)
            );
        }
        Ok(output)
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        if self.config.inter_chunk_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(CapabilityError::Cancelled),
            _ = tokio::time::sleep(self.config.inter_chunk_delay) => Ok(()),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        tracing::debug!("[chunker] Cancelled");
        return Err(CapabilityError::Cancelled);
    }
    Ok(())
}
