//! Capability configuration: the value objects that key the session pool.
//!
//! Two configs are the same pool entry iff their kind matches and their
//! options serialize to the same canonical JSON (keys sorted, absent fields
//! omitted). Floating point options therefore compare by their serialized
//! form rather than by `PartialEq`.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A distinct kind of model operation, each with its own host object shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Free-form prompting (simplify, chat, generate)
    Prompting,
    /// Summarization
    Summarizing,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Prompting => "prompting",
            CapabilityKind::Summarizing => "summarizing",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readiness of a capability as reported by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Not supported or not enabled on this device
    Unavailable,
    /// Supported, but the model asset must be downloaded first
    Downloadable,
    /// The model asset is being downloaded
    Downloading,
    /// Ready to create sessions
    Available,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Availability::Unavailable => "unavailable",
            Availability::Downloadable => "downloadable",
            Availability::Downloading => "downloading",
            Availability::Available => "available",
        };
        f.write_str(s)
    }
}

/// Shape of a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryType {
    KeyPoints,
    Tldr,
    Teaser,
    Headline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Markdown,
    PlainText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLength {
    Short,
    Medium,
    Long,
}

/// Creation options for a capability session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_type: Option<SummaryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<OutputLength>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Context shared by every call made on the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_language: Option<String>,
    /// Host-specific options passed through untouched
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A capability kind plus its creation options; the session pool key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub kind: CapabilityKind,
    #[serde(default)]
    pub options: CapabilityOptions,
}

impl CapabilityConfig {
    pub fn new(kind: CapabilityKind, options: CapabilityOptions) -> Self {
        Self { kind, options }
    }

    pub fn prompting() -> Self {
        Self::new(CapabilityKind::Prompting, CapabilityOptions::default())
    }

    pub fn summarizing() -> Self {
        Self::new(CapabilityKind::Summarizing, CapabilityOptions::default())
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_shared_context(mut self, context: impl Into<String>) -> Self {
        self.options.shared_context = Some(context.into());
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.options.tone = Some(tone.into());
        self
    }

    pub fn with_summary(
        mut self,
        summary_type: SummaryType,
        format: OutputFormat,
        length: OutputLength,
    ) -> Self {
        self.options.summary_type = Some(summary_type);
        self.options.format = Some(format);
        self.options.length = Some(length);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, top_k: u32) -> Self {
        self.options.temperature = Some(temperature);
        self.options.top_k = Some(top_k);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.extra.insert(key.into(), value);
        self
    }

    /// Canonical identity of this config: `kind` plus sorted-key JSON of the
    /// options.
    pub fn key(&self) -> String {
        let value = serde_json::to_value(&self.options).unwrap_or(serde_json::Value::Null);
        let mut out = String::with_capacity(64);
        out.push_str(self.kind.as_str());
        out.push(':');
        write_canonical(&value, &mut out);
        out
    }

    /// Short, stable label for logs and stats: the kind plus a digest of
    /// the canonical key. Never contains option text.
    pub fn short_id(&self) -> String {
        short_id_for(self.kind, &self.key())
    }
}

/// `kind#<12 hex chars>` for an already computed canonical key.
pub(crate) fn short_id_for(kind: CapabilityKind, key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}#{}", kind, hex)
}

impl PartialEq for CapabilityConfig {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.key() == other.key()
    }
}

impl Eq for CapabilityConfig {}

impl Hash for CapabilityConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for CapabilityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_id())
    }
}

/// Serialize `value` with object keys sorted, independent of how
/// `serde_json` was built.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
