//! CLI execution runner.
//!
//! Dispatches the parsed subcommand against the assistant or the settings
//! manager.

use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::assistant::SummaryStyle;
use crate::capability::{Availability, CapabilityConfig};
use crate::isolation::worker;
use crate::runtime::{HostRuntime, LocalServerRuntime};

use super::args::{Command, SettingsAction};
use super::bootstrap::{build_processor, CliContext};
use super::output::{self, StatusLine};

/// Run the command in `ctx.args`.
pub async fn execute(ctx: &mut CliContext) -> Result<()> {
    let command = ctx.args.command.clone();
    match command {
        Command::Simplify { input, level } => {
            let text = input.read().await?;
            run_operation(ctx, |assistant, cancel| {
                Box::pin(async move { assistant.simplify(&text, level, &cancel).await })
            })
            .await
        }
        Command::Summarize {
            input,
            style,
            length,
            format,
        } => {
            let text = input.read().await?;
            let style = SummaryStyle {
                summary_type: style,
                length,
                format,
            };
            run_operation(ctx, |assistant, cancel| {
                Box::pin(async move { assistant.summarize(&text, style, &cancel).await })
            })
            .await
        }
        Command::Chat { input, question } => {
            let text = input.read().await?;
            run_operation(ctx, |assistant, cancel| {
                Box::pin(async move { assistant.chat(&text, &question, &cancel).await })
            })
            .await
        }
        Command::Generate { prompt, input } => {
            let prompt = match prompt {
                Some(prompt) => prompt,
                None => input.read().await?,
            };
            run_operation(ctx, |assistant, cancel| {
                Box::pin(async move { assistant.generate(&prompt, &cancel).await })
            })
            .await
        }
        Command::Status => status(ctx).await,
        Command::Worker => run_worker(ctx).await,
        Command::Settings { action } => settings(ctx, action).await,
    }
}

type OperationFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = crate::error::Result<String>> + Send>>;

/// Run one assistant operation with Ctrl-C wired to cancellation.
async fn run_operation<F>(ctx: &mut CliContext, op: F) -> Result<()>
where
    F: FnOnce(crate::assistant::Assistant, CancellationToken) -> OperationFuture,
{
    let operation = ctx.args.operation();
    let json = ctx.args.json;
    let show_stats = ctx.args.stats;
    let assistant = ctx.assistant()?.clone();

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[cli] Cancelling...");
                cancel.cancel();
            }
        })
    };

    let started = Instant::now();
    let result = op(assistant.clone(), cancel).await;
    interrupt.abort();

    let output = result.with_context(|| format!("{} failed", operation))?;
    output::print_result(operation, &output, started.elapsed(), json)?;

    if show_stats {
        let stats = assistant.stats().await.context("Failed to read pool stats")?;
        output::print_stats(&stats, json)?;
    }
    Ok(())
}

async fn status(ctx: &CliContext) -> Result<()> {
    let config = ctx.settings.runtime.to_local_config();
    let base_url = config.base_url.clone();
    let runtime =
        LocalServerRuntime::new(config.clone()).context("Failed to create inference client")?;

    let mut lines = Vec::new();
    for (capability, model) in [
        (CapabilityConfig::prompting(), config.prompt_model.clone()),
        (CapabilityConfig::summarizing(), config.summarize_model.clone()),
    ] {
        let (availability, error) = match runtime.availability(&capability).await {
            Ok(availability) => (availability, None),
            Err(e) => (Availability::Unavailable, Some(e.to_string())),
        };
        lines.push(StatusLine {
            capability: capability.kind,
            model,
            availability,
            error,
        });
    }

    output::print_status(&base_url, &lines, ctx.args.json)
}

/// Serve the isolated protocol on stdio until the parent goes away.
async fn run_worker(ctx: &CliContext) -> Result<()> {
    let processor = build_processor(&ctx.settings)?;
    let reaper_cancel = CancellationToken::new();
    let reaper = ctx
        .settings
        .pool
        .reaper_interval()
        .map(|interval| processor.pool().spawn_reaper(interval, reaper_cancel.clone()));

    let result = worker::serve_stdio(processor).await;

    reaper_cancel.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    result.context("Worker stdio failed")
}

async fn settings(ctx: &CliContext, action: SettingsAction) -> Result<()> {
    let manager = &ctx.settings_manager;
    match action {
        SettingsAction::Path => {
            println!("{}", manager.path().display());
        }
        SettingsAction::Show => {
            let settings = manager.get().await;
            if ctx.args.json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                print!("{}", toml::to_string_pretty(&settings)?);
            }
        }
        SettingsAction::Get { key } => {
            let value = manager.get_value(&key).await?;
            output::print_value(&value, ctx.args.json)?;
        }
        SettingsAction::Set { key, value } => {
            manager.set_value(&key, parse_value(&value)).await?;
            eprintln!("[settings] {} updated in {}", key, manager.path().display());
        }
        SettingsAction::Init => {
            if manager.ensure_settings_file().await? {
                eprintln!("[settings] Created {}", manager.path().display());
            } else {
                eprintln!("[settings] {} already exists", manager.path().display());
            }
        }
    }
    Ok(())
}

/// Interpret a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
