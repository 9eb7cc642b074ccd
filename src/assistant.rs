//! Article operations on top of the pool and processor.
//!
//! The [`Assistant`] hides whether work runs in this process or in an
//! isolated worker; both backends honor the same pool and chunking contracts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::capability::{CapabilityConfig, OutputFormat, OutputLength, SummaryType};
use crate::chunking::ChunkLimits;
use crate::error::Result;
use crate::isolation::IsolatedHost;
use crate::pool::PoolStats;
use crate::processor::ChunkProcessor;
use crate::prompts::{self, ReadingLevel};

/// How a summary should look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStyle {
    pub summary_type: SummaryType,
    pub length: OutputLength,
    pub format: OutputFormat,
}

impl Default for SummaryStyle {
    fn default() -> Self {
        Self {
            summary_type: SummaryType::KeyPoints,
            length: OutputLength::Medium,
            format: OutputFormat::Markdown,
        }
    }
}

/// Where processing happens
#[derive(Clone)]
pub enum Backend {
    InProcess(ChunkProcessor),
    Isolated(Arc<IsolatedHost>),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::InProcess(_) => "in-process",
            Backend::Isolated(_) => "isolated",
        }
    }
}

#[derive(Clone)]
pub struct Assistant {
    backend: Backend,
    limits: ChunkLimits,
}

impl Assistant {
    pub fn new(backend: Backend, limits: ChunkLimits) -> Self {
        tracing::debug!("[assistant] Using {} backend", backend.name());
        Self {
            backend,
            limits: limits.clamped(),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn limits(&self) -> ChunkLimits {
        self.limits
    }

    /// Process `text` with the assistant's default limits.
    pub async fn acquire_and_use(&self, config: &CapabilityConfig, text: &str) -> Result<String> {
        self.process(config, text, self.limits, &CancellationToken::new())
            .await
    }

    pub async fn process(
        &self,
        config: &CapabilityConfig,
        text: &str,
        limits: ChunkLimits,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match &self.backend {
            Backend::InProcess(processor) => processor.process(text, config, limits, cancel).await,
            Backend::Isolated(host) => host.process(text, config, limits, cancel).await,
        }
    }

    /// Rewrite an article at an easier reading level.
    pub async fn simplify(
        &self,
        article: &str,
        level: ReadingLevel,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let config = simplify_config(level);
        self.process(&config, article, self.limits, cancel).await
    }

    pub async fn summarize(
        &self,
        article: &str,
        style: SummaryStyle,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let config = summarize_config(style);
        self.process(&config, article, self.limits, cancel).await
    }

    /// Answer a question using only the article.
    pub async fn chat(
        &self,
        article: &str,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let config = chat_config(article);
        self.process(&config, question, self.limits, cancel).await
    }

    pub async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let config = CapabilityConfig::prompting().with_system_prompt(prompts::generate_system());
        self.process(&config, prompt, self.limits, cancel).await
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        match &self.backend {
            Backend::InProcess(processor) => Ok(processor.pool().stats()),
            Backend::Isolated(host) => host.stats().await,
        }
    }

    /// Destroy every pooled session. Returns the number of destroy attempts.
    pub async fn destroy_all(&self) -> Result<usize> {
        match &self.backend {
            Backend::InProcess(processor) => Ok(processor.pool().destroy_all().await),
            Backend::Isolated(host) => host.destroy_all().await,
        }
    }

    /// Drain sessions and stop the isolated worker, if any.
    pub async fn shutdown(&self) -> Result<usize> {
        match &self.backend {
            Backend::InProcess(processor) => Ok(processor.pool().destroy_all().await),
            Backend::Isolated(host) => host.shutdown().await,
        }
    }
}

pub fn simplify_config(level: ReadingLevel) -> CapabilityConfig {
    CapabilityConfig::prompting()
        .with_system_prompt(prompts::simplify_system(level))
        .with_sampling(0.3, 3)
}

pub fn summarize_config(style: SummaryStyle) -> CapabilityConfig {
    CapabilityConfig::summarizing().with_summary(style.summary_type, style.format, style.length)
}

/// Chat sessions are keyed by article, so follow-up questions reuse them.
pub fn chat_config(article: &str) -> CapabilityConfig {
    CapabilityConfig::prompting()
        .with_system_prompt(prompts::chat_system())
        .with_shared_context(prompts::article_context(None, article))
}
