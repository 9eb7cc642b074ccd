//! Request and response types for the Ollama-compatible HTTP API.

use serde::{Deserialize, Serialize};

/// Default address of a local inference server
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Server version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// A model installed on the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model tag, e.g. "llama3.2:latest"
    pub name: String,
    /// Size on disk in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

impl ModelInfo {
    /// Whether this entry refers to `model`, treating a missing tag as `:latest`.
    pub fn matches(&self, model: &str) -> bool {
        if self.name == model {
            return true;
        }
        match (self.name.strip_suffix(":latest"), model.contains(':')) {
            (Some(base), false) => base == model,
            _ => false,
        }
    }
}

/// Response of `GET /api/tags`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// Request body of `POST /api/pull`
#[derive(Debug, Clone, Serialize)]
pub struct PullRequest {
    pub model: String,
    pub stream: bool,
}

/// Final status of a non-streaming pull
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponse {
    pub status: String,
}

/// Sampling options forwarded to the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl GenerateOptions {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_k.is_none() && self.num_ctx.is_none()
    }
}

/// Request body of `POST /api/generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Continuation context returned by a previous call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "GenerateOptions::is_empty")]
    pub options: GenerateOptions,
    pub stream: bool,
}

impl GenerateRequest {
    /// Create a non-streaming request for `model`.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            context: None,
            options: GenerateOptions::default(),
            stream: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_context(mut self, context: Option<Vec<i64>>) -> Self {
        self.context = context;
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

/// Response of a non-streaming `POST /api/generate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
}

/// Error body returned by the server
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}
