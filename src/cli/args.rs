//! CLI argument parsing using clap.
//!
//! Defines the command-line interface for pagewise-cli.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;

use crate::capability::{OutputFormat, OutputLength, SummaryType};
use crate::prompts::ReadingLevel;
use crate::settings::IsolationMode;

/// Pagewise CLI - Simplify, summarize and chat with articles on a local model
#[derive(Parser, Debug, Clone)]
#[command(name = "pagewise-cli")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Override where the pool runs (off, thread, process)
    #[arg(long, global = true)]
    pub isolation: Option<IsolationMode>,

    /// Inference server URL (overrides settings and env vars)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Model for both prompting and summarizing
    #[arg(short = 'm', long, global = true)]
    pub model: Option<String>,

    /// Settings file (default: ~/.pagewise/settings.toml)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Output results as JSON (for scripting/parsing)
    #[arg(long, global = true)]
    pub json: bool,

    /// Print pool statistics after the operation
    #[arg(long, global = true)]
    pub stats: bool,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Rewrite an article at an easier reading level
    Simplify {
        #[command(flatten)]
        input: InputArgs,

        /// low, mid or high
        #[arg(short = 'l', long, default_value = "mid")]
        level: ReadingLevel,
    },

    /// Summarize an article
    Summarize {
        #[command(flatten)]
        input: InputArgs,

        /// key-points, tldr, teaser or headline
        #[arg(long, default_value = "key-points", value_parser = kebab::<SummaryType>)]
        style: SummaryType,

        /// short, medium or long
        #[arg(long, default_value = "medium", value_parser = kebab::<OutputLength>)]
        length: OutputLength,

        /// markdown or plain-text
        #[arg(long, default_value = "markdown", value_parser = kebab::<OutputFormat>)]
        format: OutputFormat,
    },

    /// Ask a question about an article
    Chat {
        #[command(flatten)]
        input: InputArgs,

        #[arg(short = 'q', long)]
        question: String,
    },

    /// Free-form generation
    Generate {
        /// Prompt text; read from --file or stdin when omitted
        #[arg(short = 'p', long)]
        prompt: Option<String>,

        #[command(flatten)]
        input: InputArgs,
    },

    /// Report model availability for each capability
    Status,

    /// Serve isolated requests over stdin/stdout (started by --isolation process)
    #[command(hide = true)]
    Worker,

    /// Inspect or edit the settings file
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsAction {
    /// Print the settings file location
    Path,
    /// Print the effective settings as TOML
    Show,
    /// Print one value by dot path (e.g. pool.max_sessions)
    Get { key: String },
    /// Set one value by dot path; the value is parsed as JSON, else taken as a string
    Set { key: String, value: String },
    /// Write the commented template if no settings file exists
    Init,
}

/// Where article text comes from.
#[derive(ClapArgs, Debug, Clone, Default, PartialEq, Eq)]
pub struct InputArgs {
    /// Read text from a file instead of stdin
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,
}

impl InputArgs {
    /// Read the input text, from `--file` if given, otherwise all of stdin.
    pub async fn read(&self) -> anyhow::Result<String> {
        let text = match &self.file {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read input file: {}", path.display()))?,
            None => {
                let mut text = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut text)
                    .await
                    .context("Failed to read stdin")?;
                text
            }
        };

        if text.trim().is_empty() {
            anyhow::bail!("Input is empty");
        }
        Ok(text)
    }
}

impl Args {
    /// Label for the requested operation, used in output.
    pub fn operation(&self) -> &'static str {
        match self.command {
            Command::Simplify { .. } => "simplify",
            Command::Summarize { .. } => "summarize",
            Command::Chat { .. } => "chat",
            Command::Generate { .. } => "generate",
            Command::Status => "status",
            Command::Worker => "worker",
            Command::Settings { .. } => "settings",
        }
    }
}

/// Parse a kebab-case value through its serde representation.
fn kebab<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
        .map_err(|_| format!("invalid value '{}'", s))
}
