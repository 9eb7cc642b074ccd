//! CLI bootstrap - Initialize the Pagewise stack for CLI usage.
//!
//! `initialize` loads `.env`, settings and logging. The model runtime, pool
//! and assistant are built on first use so `settings` subcommands work
//! without a reachable inference server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assistant::{Assistant, Backend};
use crate::isolation::{IsolatedHost, ProcessProvisioner, ProcessorFactory, ThreadProvisioner};
use crate::logging;
use crate::pool::SessionPool;
use crate::processor::ChunkProcessor;
use crate::runtime::LocalServerRuntime;
use crate::settings::{IsolationMode, PagewiseSettings, SettingsManager};

use super::args::{Args, Command};

/// Context for CLI execution containing all initialized services.
pub struct CliContext {
    /// Settings manager
    pub settings_manager: Arc<SettingsManager>,

    /// Effective settings (file + env + command-line overrides)
    pub settings: PagewiseSettings,

    /// Built by `assistant()`
    assistant: Option<Assistant>,

    /// Stops the in-process idle reaper
    reaper_cancel: CancellationToken,
    reaper: Option<JoinHandle<()>>,

    /// Command-line arguments
    pub args: Args,
}

impl CliContext {
    /// Get the assistant, building the runtime and backend on first call.
    pub fn assistant(&mut self) -> Result<&Assistant> {
        if self.assistant.is_none() {
            let backend = self.build_backend()?;
            self.assistant = Some(Assistant::new(backend, self.settings.chunking.limits()));
        }
        self.assistant
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Assistant not initialized"))
    }

    fn build_backend(&mut self) -> Result<Backend> {
        let mode = self.settings.isolation.mode;
        if self.args.verbose {
            eprintln!("[cli] Isolation: {}", mode);
            eprintln!(
                "[cli] Server: {}",
                self.settings.runtime.resolved_base_url()
            );
        }

        match mode {
            IsolationMode::Off => {
                let processor = build_processor(&self.settings)?;
                if let Some(interval) = self.settings.pool.reaper_interval() {
                    self.reaper = Some(
                        processor
                            .pool()
                            .spawn_reaper(interval, self.reaper_cancel.clone()),
                    );
                }
                Ok(Backend::InProcess(processor))
            }
            IsolationMode::Thread => {
                let settings = self.settings.clone();
                let factory: ProcessorFactory = Arc::new(move || {
                    let processor = build_processor(&settings)?;
                    if let Some(interval) = settings.pool.reaper_interval() {
                        // Runs on the worker's runtime and ends when its pool closes
                        let _ = processor
                            .pool()
                            .spawn_reaper(interval, CancellationToken::new());
                    }
                    Ok(processor)
                });
                let host = IsolatedHost::new(Arc::new(ThreadProvisioner::new(factory)));
                Ok(Backend::Isolated(Arc::new(host)))
            }
            IsolationMode::Process => {
                let provisioner = ProcessProvisioner::current_exe(worker_args(&self.args))
                    .context("Failed to locate the pagewise-cli executable")?;
                let host = IsolatedHost::new(Arc::new(provisioner));
                Ok(Backend::Isolated(Arc::new(host)))
            }
        }
    }

    /// Graceful shutdown - stop the reaper, drain the pool, stop any worker.
    pub async fn shutdown(mut self) -> Result<()> {
        self.reaper_cancel.cancel();
        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.await;
        }

        if let Some(assistant) = self.assistant.take() {
            match assistant.shutdown().await {
                Ok(count) => {
                    tracing::debug!("[cli] Destroyed {} session(s) on shutdown", count)
                }
                Err(e) => tracing::warn!("[cli] Shutdown error: {}", e),
            }
        }

        Ok(())
    }
}

/// Build the host runtime, pool and processor described by `settings`.
pub fn build_processor(settings: &PagewiseSettings) -> Result<ChunkProcessor> {
    let runtime = LocalServerRuntime::new(settings.runtime.to_local_config())
        .context("Failed to create inference client")?;
    let pool = SessionPool::new(Arc::new(runtime), settings.pool.to_config());
    Ok(ChunkProcessor::new(
        pool,
        settings.chunking.processor_config(),
    ))
}

/// Arguments for a `worker` child that sees the same settings as this process.
fn worker_args(args: &Args) -> Vec<String> {
    let mut forwarded = vec!["worker".to_string()];
    if let Some(ref path) = args.settings {
        forwarded.push("--settings".to_string());
        forwarded.push(path.display().to_string());
    }
    if let Some(ref url) = args.base_url {
        forwarded.push("--base-url".to_string());
        forwarded.push(url.clone());
    }
    if let Some(ref model) = args.model {
        forwarded.push("--model".to_string());
        forwarded.push(model.clone());
    }
    if args.verbose {
        forwarded.push("--verbose".to_string());
    }
    forwarded
}

/// Apply command-line overrides on top of loaded settings.
fn apply_overrides(settings: &mut PagewiseSettings, args: &Args) {
    if let Some(ref url) = args.base_url {
        settings.runtime.base_url = Some(url.clone());
    }
    if let Some(ref model) = args.model {
        settings.runtime.prompt_model = model.clone();
        settings.runtime.summarize_model = model.clone();
    }
    if let Some(mode) = args.isolation {
        settings.isolation.mode = mode;
    }
    // A worker never isolates again
    if matches!(args.command, Command::Worker) {
        settings.isolation.mode = IsolationMode::Off;
    }
}

/// Initialize the CLI context.
pub async fn initialize(args: &Args) -> Result<CliContext> {
    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        // Only warn on errors other than file not found
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("[cli] Failed to load .env file: {}", e);
        }
    }

    let settings_manager = Arc::new(
        match args.settings {
            Some(ref path) => SettingsManager::with_path(path).await,
            None => SettingsManager::new().await,
        }
        .context("Failed to initialize settings manager")?,
    );

    let mut settings = settings_manager.get().await;
    apply_overrides(&mut settings, args);

    // Initialize logging; stdout belongs to results (and to the protocol in a worker)
    let level = if args.verbose {
        "debug"
    } else {
        settings.logging.level.as_str()
    };
    logging::init(level);

    if args.verbose {
        eprintln!(
            "[cli] Settings loaded from {}",
            settings_manager.path().display()
        );
    }

    Ok(CliContext {
        settings_manager,
        settings,
        assistant: None,
        reaper_cancel: CancellationToken::new(),
        reaper: None,
        args: args.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_overrides_apply_to_both_models() {
        let args = Args::parse_from([
            "pagewise-cli",
            "status",
            "-m",
            "phi3:mini",
            "--base-url",
            "http://10.0.0.2:11434",
            "--isolation",
            "thread",
        ]);
        let mut settings = PagewiseSettings::default();
        apply_overrides(&mut settings, &args);

        assert_eq!(settings.runtime.prompt_model, "phi3:mini");
        assert_eq!(settings.runtime.summarize_model, "phi3:mini");
        assert_eq!(settings.runtime.resolved_base_url(), "http://10.0.0.2:11434");
        assert_eq!(settings.isolation.mode, IsolationMode::Thread);
    }

    #[test]
    fn test_worker_never_isolates() {
        let args = Args::parse_from(["pagewise-cli", "worker", "--isolation", "process"]);
        let mut settings = PagewiseSettings::default();
        apply_overrides(&mut settings, &args);
        assert_eq!(settings.isolation.mode, IsolationMode::Off);
    }

    #[test]
    fn test_worker_args_forward_overrides() {
        let args = Args::parse_from([
            "pagewise-cli",
            "summarize",
            "--settings",
            "/tmp/p.toml",
            "-m",
            "phi3:mini",
        ]);
        assert_eq!(
            worker_args(&args),
            vec!["worker", "--settings", "/tmp/p.toml", "--model", "phi3:mini"]
        );
    }

    #[tokio::test]
    async fn test_initialize_with_settings_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[pool]\nmax_sessions = 2\n[isolation]\nmode = \"thread\"\n")
            .unwrap();

        let args = Args::parse_from([
            "pagewise-cli",
            "status",
            "--settings",
            path.to_str().unwrap(),
        ]);
        let mut ctx = initialize(&args).await.unwrap();
        assert_eq!(ctx.settings.pool.max_sessions, 2);
        assert_eq!(ctx.settings.isolation.mode, IsolationMode::Thread);

        // Building the backend does not contact the server
        let assistant = ctx.assistant().unwrap();
        assert_eq!(assistant.backend().name(), "isolated");
        ctx.shutdown().await.unwrap();
    }
}
