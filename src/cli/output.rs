//! CLI output handling.
//!
//! Results go to stdout, either as plain text or as one JSON document per
//! result. Diagnostics go to stderr.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::capability::{Availability, CapabilityKind};
use crate::error::CapabilityError;
use crate::pool::PoolStats;

/// Availability of one capability, as reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusLine {
    pub capability: CapabilityKind,
    pub model: String,
    pub availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn print_result(operation: &str, text: &str, elapsed: Duration, json_mode: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if json_mode {
        let json = serde_json::json!({
            "operation": operation,
            "output": text,
            "elapsed_ms": elapsed.as_millis() as u64,
        });
        writeln!(stdout, "{}", json)?;
    } else {
        writeln!(stdout, "{}", text.trim_end())?;
    }
    stdout.flush()?;
    Ok(())
}

pub fn print_stats(stats: &PoolStats, json_mode: bool) -> Result<()> {
    if json_mode {
        println!("{}", serde_json::json!({ "type": "pool_stats", "stats": stats }));
        return Ok(());
    }

    eprintln!(
        "[pool] {}/{} session(s), {} use(s)",
        stats.session_count,
        stats.max_sessions,
        stats.total_uses()
    );
    for session in &stats.sessions {
        eprintln!(
            "[pool]   {} uses={} in_flight={} idle={}ms age={}ms",
            session.id,
            session.use_count,
            session.in_flight,
            session.idle_ms,
            session.age_ms
        );
    }
    Ok(())
}

pub fn print_status(base_url: &str, lines: &[StatusLine], json_mode: bool) -> Result<()> {
    if json_mode {
        let json = serde_json::json!({
            "base_url": base_url,
            "capabilities": lines,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("Server: {}", base_url);
    for line in lines {
        match &line.error {
            Some(error) => println!(
                "  {:<12} {:<20} {} ({})",
                line.capability,
                line.model,
                line.availability,
                truncate(error, 80)
            ),
            None => println!(
                "  {:<12} {:<20} {}",
                line.capability, line.model, line.availability
            ),
        }
    }
    Ok(())
}

/// Print a single settings value: strings bare, everything else as JSON.
pub fn print_value(value: &serde_json::Value, json_mode: bool) -> Result<()> {
    match value {
        serde_json::Value::String(s) if !json_mode => println!("{}", s),
        serde_json::Value::Object(_) if !json_mode => print!("{}", toml::to_string_pretty(value)?),
        other => println!("{}", other),
    }
    Ok(())
}

/// Report a failed command on stderr (and as JSON on stdout in JSON mode).
pub fn print_error(error: &anyhow::Error, json_mode: bool) {
    let capability = error.downcast_ref::<CapabilityError>();

    if json_mode {
        let json = serde_json::json!({
            "type": "error",
            "message": format!("{:#}", error),
            "cancelled": capability.map(|e| e.is_cancelled()).unwrap_or(false),
            "retryable": capability.map(|e| e.is_retryable()).unwrap_or(false),
        });
        println!("{}", json);
        return;
    }

    match capability {
        Some(e) if e.is_cancelled() => eprintln!("{}", e.user_message()),
        Some(e) => {
            eprintln!("Error: {}", e.user_message());
            eprintln!("  {:#}", error);
        }
        None => eprintln!("Error: {:#}", error),
    }
}

/// Truncate a string to a maximum number of characters.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
