//! Settings schema for Pagewise.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with sensible defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::{ChunkLimits, DEFAULT_CHUNK_OVERLAP, DEFAULT_MAX_INPUT_SIZE};
use crate::pool::{PoolConfig, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_SESSIONS};
use crate::processor::{ProcessorConfig, DEFAULT_INTER_CHUNK_DELAY_MS};
use crate::runtime::LocalServerConfig;

use super::loader::get_with_env_fallback;

/// Root settings structure.
///
/// Loaded from `~/.pagewise/settings.toml` with environment variable interpolation support.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagewiseSettings {
    /// Schema version for migrations
    pub version: u32,

    /// Session pool limits and host timeouts
    pub pool: PoolSettings,

    pub chunking: ChunkingSettings,

    /// Local inference server
    pub runtime: RuntimeSettings,

    pub isolation: IsolationSettings,

    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_sessions: usize,
    pub min_creation_interval_ms: u64,
    pub idle_timeout_secs: u64,
    pub destroy_grace_ms: u64,
    pub create_retries: u32,
    pub create_backoff_ms: u64,
    pub availability_timeout_ms: u64,
    pub create_timeout_ms: u64,
    /// Local cap on one process call; 0 leaves it to the host
    pub process_timeout_secs: u64,
    /// How often idle sessions are swept; 0 disables the reaper
    pub reaper_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Largest input sent to the model in one call, in characters
    pub max_input_size: usize,
    pub chunk_overlap: usize,
    pub inter_chunk_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Server URL (supports $ENV_VAR syntax); falls back to `PAGEWISE_BASE_URL` / `OLLAMA_HOST`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub prompt_model: String,
    pub summarize_model: String,
    /// Pull missing models on first use
    pub auto_pull: bool,
    /// 0 disables the HTTP timeout
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSettings {
    pub mode: IsolationMode,
}

/// Where the pool and processor run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Same process, same runtime
    #[default]
    Off,
    /// Dedicated thread with its own runtime
    Thread,
    /// Child process over stdio
    Process,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationMode::Off => "off",
            IsolationMode::Thread => "thread",
            IsolationMode::Process => "process",
        };
        f.write_str(s)
    }
}

impl FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(IsolationMode::Off),
            "thread" => Ok(IsolationMode::Thread),
            "process" => Ok(IsolationMode::Process),
            other => Err(format!(
                "invalid isolation mode '{}' (expected off, thread or process)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
}

impl Default for PagewiseSettings {
    fn default() -> Self {
        Self {
            version: 1,
            pool: PoolSettings::default(),
            chunking: ChunkingSettings::default(),
            runtime: RuntimeSettings::default(),
            isolation: IsolationSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            min_creation_interval_ms: 1000,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            destroy_grace_ms: 200,
            create_retries: 2,
            create_backoff_ms: 2000,
            availability_timeout_ms: 5000,
            create_timeout_ms: 15000,
            process_timeout_secs: 0,
            reaper_interval_secs: 60,
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            inter_chunk_delay_ms: DEFAULT_INTER_CHUNK_DELAY_MS,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let local = LocalServerConfig::default();
        Self {
            base_url: None,
            prompt_model: local.prompt_model,
            summarize_model: local.summarize_model,
            auto_pull: local.auto_pull,
            request_timeout_secs: 120,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl PoolSettings {
    pub fn to_config(&self) -> PoolConfig {
        PoolConfig {
            max_sessions: self.max_sessions,
            min_creation_interval: Duration::from_millis(self.min_creation_interval_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            destroy_grace: Duration::from_millis(self.destroy_grace_ms),
            create_retries: self.create_retries,
            create_backoff: Duration::from_millis(self.create_backoff_ms),
            availability_timeout: Duration::from_millis(self.availability_timeout_ms),
            create_timeout: Duration::from_millis(self.create_timeout_ms),
            process_timeout: optional_secs(self.process_timeout_secs),
        }
    }

    pub fn reaper_interval(&self) -> Option<Duration> {
        optional_secs(self.reaper_interval_secs)
    }
}

impl ChunkingSettings {
    pub fn limits(&self) -> ChunkLimits {
        ChunkLimits::new(self.max_input_size, self.chunk_overlap)
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            inter_chunk_delay: Duration::from_millis(self.inter_chunk_delay_ms),
            default_limits: self.limits(),
        }
    }
}

impl RuntimeSettings {
    /// Resolve the server URL: settings, then `PAGEWISE_BASE_URL`, then
    /// `OLLAMA_HOST`, then the default local address.
    pub fn resolved_base_url(&self) -> String {
        let url = get_with_env_fallback(
            &self.base_url,
            &["PAGEWISE_BASE_URL", "OLLAMA_HOST"],
            Some(local_llm_client::DEFAULT_BASE_URL.to_string()),
        )
        .unwrap_or_else(|| local_llm_client::DEFAULT_BASE_URL.to_string());

        // OLLAMA_HOST is commonly just host:port
        if url.contains("://") {
            url
        } else {
            format!("http://{}", url)
        }
    }

    pub fn to_local_config(&self) -> LocalServerConfig {
        LocalServerConfig {
            base_url: self.resolved_base_url(),
            prompt_model: self.prompt_model.clone(),
            summarize_model: self.summarize_model.clone(),
            auto_pull: self.auto_pull,
            request_timeout: optional_secs(self.request_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PagewiseSettings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.pool.max_sessions, 3);
        assert_eq!(settings.chunking.max_input_size, 4000);
        assert_eq!(settings.chunking.chunk_overlap, 200);
        assert_eq!(settings.isolation.mode, IsolationMode::Off);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            version = 1
            [pool]
            max_sessions = 5
            [isolation]
            mode = "thread"
        "#;

        let settings: PagewiseSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.pool.max_sessions, 5);
        assert_eq!(settings.isolation.mode, IsolationMode::Thread);
        // Defaults should fill in missing fields
        assert_eq!(settings.pool.create_retries, 2);
        assert_eq!(settings.chunking.inter_chunk_delay_ms, 500);
    }

    #[test]
    fn test_serialize_settings() {
        let settings = PagewiseSettings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("version = 1"));
        assert!(toml_str.contains("[pool]"));
        assert!(toml_str.contains("mode = \"off\""));
    }

    #[test]
    fn test_pool_settings_convert() {
        let config = PoolSettings::default().to_config();
        assert_eq!(config, PoolConfig::default());
        assert_eq!(
            PoolSettings::default().reaper_interval(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_chunking_settings_clamp_overlap() {
        let settings = ChunkingSettings {
            max_input_size: 100,
            chunk_overlap: 90,
            inter_chunk_delay_ms: 0,
        };
        assert_eq!(settings.limits().chunk_overlap, 49);
        assert!(settings.processor_config().inter_chunk_delay.is_zero());
    }

    #[test]
    fn test_isolation_mode_parse() {
        assert_eq!("PROCESS".parse::<IsolationMode>(), Ok(IsolationMode::Process));
        assert_eq!("none".parse::<IsolationMode>(), Ok(IsolationMode::Off));
        assert!("fork".parse::<IsolationMode>().is_err());
    }

    #[test]
    fn test_base_url_from_settings_gets_scheme() {
        let settings = RuntimeSettings {
            base_url: Some("localhost:9999".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.resolved_base_url(), "http://localhost:9999");
        assert!(settings.to_local_config().request_timeout.is_some());
    }
}
