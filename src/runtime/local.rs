//! Host runtime backed by a local inference server.
//!
//! Talks to an Ollama-compatible server through `local-llm-client`. Each
//! capability kind maps to one model; a missing model can be pulled in the
//! background, during which the capability reports `Downloading`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use local_llm_client::{Client, ClientError, GenerateOptions, GenerateRequest};
use parking_lot::Mutex;

use super::{CapabilitySession, HostError, HostRuntime};
use crate::capability::{Availability, CapabilityConfig, CapabilityKind};
use crate::prompts;

/// Connection and model settings for [`LocalServerRuntime`].
#[derive(Debug, Clone)]
pub struct LocalServerConfig {
    pub base_url: String,
    /// Model used for prompting sessions
    pub prompt_model: String,
    /// Model used for summarizing sessions
    pub summarize_model: String,
    /// Pull a missing model when a session is requested for it
    pub auto_pull: bool,
    /// Per-request HTTP timeout; `None` leaves it to the server
    pub request_timeout: Option<Duration>,
}

impl Default for LocalServerConfig {
    fn default() -> Self {
        Self {
            base_url: local_llm_client::DEFAULT_BASE_URL.to_string(),
            prompt_model: "llama3.2:3b".to_string(),
            summarize_model: "llama3.2:3b".to_string(),
            auto_pull: true,
            request_timeout: None,
        }
    }
}

pub struct LocalServerRuntime {
    client: Client,
    config: LocalServerConfig,
    /// Models with a pull in flight
    pulls: Arc<Mutex<HashSet<String>>>,
}

impl LocalServerRuntime {
    pub fn new(config: LocalServerConfig) -> Result<Self, ClientError> {
        let client = match config.request_timeout {
            Some(timeout) => Client::with_timeout(&config.base_url, timeout)?,
            None => Client::new(&config.base_url)?,
        };
        Ok(Self {
            client,
            config,
            pulls: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &LocalServerConfig {
        &self.config
    }

    fn model_for(&self, kind: CapabilityKind) -> &str {
        match kind {
            CapabilityKind::Prompting => &self.config.prompt_model,
            CapabilityKind::Summarizing => &self.config.summarize_model,
        }
    }

    fn pull_in_flight(&self, model: &str) -> bool {
        self.pulls.lock().contains(model)
    }

    /// Start pulling `model` in the background unless a pull is already running.
    fn spawn_pull(&self, model: &str) {
        if !self.pulls.lock().insert(model.to_string()) {
            return;
        }

        let client = self.client.clone();
        let pulls = self.pulls.clone();
        let model = model.to_string();
        tokio::spawn(async move {
            tracing::info!("[runtime] Starting background pull of {}", model);
            let result = client.pull(&model).await;
            pulls.lock().remove(&model);
            match result {
                Ok(()) => tracing::info!("[runtime] Model {} is ready", model),
                Err(e) => tracing::warn!("[runtime] Pull of {} failed: {}", model, e),
            }
        });
    }

    /// Check whether `model` is installed, classifying an unreachable server.
    async fn model_installed(&self, model: &str) -> Result<bool, HostError> {
        self.client
            .has_model(model)
            .await
            .map_err(|e| map_client_error(e, model))
    }
}

#[async_trait]
impl HostRuntime for LocalServerRuntime {
    async fn availability(&self, config: &CapabilityConfig) -> Result<Availability, HostError> {
        let model = self.model_for(config.kind);
        match self.model_installed(model).await {
            Ok(true) => Ok(Availability::Available),
            Ok(false) if self.pull_in_flight(model) => Ok(Availability::Downloading),
            Ok(false) => Ok(Availability::Downloadable),
            Err(HostError::Crashed(reason)) => {
                tracing::debug!("[runtime] Server unreachable: {}", reason);
                Ok(Availability::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    async fn create(
        &self,
        config: &CapabilityConfig,
    ) -> Result<Arc<dyn CapabilitySession>, HostError> {
        let model = self.model_for(config.kind).to_string();

        if !self.model_installed(&model).await? {
            if self.pull_in_flight(&model) {
                return Err(HostError::DownloadPending(model));
            }
            if self.config.auto_pull {
                self.spawn_pull(&model);
                return Err(HostError::DownloadPending(model));
            }
            return Err(HostError::Unavailable(format!(
                "model {} is not installed",
                model
            )));
        }

        tracing::debug!("[runtime] Session created for {} on {}", config.kind, model);
        Ok(Arc::new(LocalSession::new(self.client.clone(), model, config)))
    }

    fn description(&self) -> String {
        format!(
            "Local inference server at {} (prompt: {}, summarize: {})",
            self.client.base_url(),
            self.config.prompt_model,
            self.config.summarize_model
        )
    }
}

struct LocalSession {
    client: Client,
    model: String,
    system: Option<String>,
    shared_context: Option<String>,
    options: GenerateOptions,
    /// Prompting sessions carry the server's continuation context across calls
    stateful: bool,
    continuation: Mutex<Option<Vec<i64>>>,
    destroyed: AtomicBool,
}

impl LocalSession {
    fn new(client: Client, model: String, config: &CapabilityConfig) -> Self {
        let opts = &config.options;
        let system = match config.kind {
            CapabilityKind::Prompting => opts.system_prompt.clone(),
            CapabilityKind::Summarizing => Some(prompts::summarizer_system(opts)),
        };
        let num_ctx = opts
            .extra
            .get("num_ctx")
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok());

        Self {
            client,
            model,
            system,
            shared_context: opts.shared_context.clone(),
            options: GenerateOptions {
                temperature: opts.temperature,
                top_k: opts.top_k,
                num_ctx,
            },
            stateful: config.kind == CapabilityKind::Prompting,
            continuation: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CapabilitySession for LocalSession {
    async fn process(&self, text: &str, context: Option<&str>) -> Result<String, HostError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(HostError::Failed("session destroyed".to_string()));
        }

        let prompt = match prompts::merge_context(self.shared_context.as_deref(), context) {
            Some(ctx) => format!("{ctx}\n\n{text}"),
            None => text.to_string(),
        };

        let mut request = GenerateRequest::new(&self.model, prompt).with_options(self.options.clone());
        if let Some(system) = &self.system {
            request = request.with_system(system.clone());
        }
        if self.stateful {
            request = request.with_context(self.continuation.lock().clone());
        }

        let response = self
            .client
            .generate(&request)
            .await
            .map_err(|e| map_client_error(e, &self.model))?;

        if self.stateful && !self.destroyed.load(Ordering::SeqCst) {
            *self.continuation.lock() = response.context;
        }
        Ok(response.response)
    }

    async fn destroy(&self) -> Result<(), HostError> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.continuation.lock().take();
        Ok(())
    }
}

fn map_client_error(err: ClientError, model: &str) -> HostError {
    if err.is_connect() {
        HostError::Crashed(err.to_string())
    } else if err.is_model_missing() {
        HostError::Unavailable(format!("model {} not found on server", model))
    } else {
        HostError::Failed(err.to_string())
    }
}
