//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and the inference client only. Logs go to stderr: stdout carries
//! results, and in a worker process the protocol lines.

use tracing::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn default_directives(level: &str) -> String {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => l.to_string(),
        other => {
            if !other.is_empty() {
                eprintln!("[logging] Unknown level '{}', using info", other);
            }
            "info".to_string()
        }
    };
    format!("pagewise_lib={level},pagewise_cli={level},local_llm_client={level}")
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

fn subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish()
}

/// Install the global subscriber.
///
/// Returns `false` if one was already installed (tests, embedding apps).
pub fn init(level: &str) -> bool {
    subscriber(filter(level)).try_init().is_ok()
}
