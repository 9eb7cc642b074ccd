//! Pagewise CLI - Headless interface for the article assistant
//!
//! # Usage
//!
//! ```bash
//! # Build the CLI binary
//! cargo build --bin pagewise-cli
//!
//! # Simplify an article read from stdin
//! cat article.txt | ./target/debug/pagewise-cli simplify --level high
//!
//! # Summarize a file with the pool in a child process, as JSON
//! ./target/debug/pagewise-cli summarize -f article.txt --style tldr --isolation process --json
//!
//! # Ask about an article and show pool statistics afterwards
//! ./target/debug/pagewise-cli chat -f article.txt -q "Who is quoted?" --stats
//!
//! # Check whether the configured models are ready
//! ./target/debug/pagewise-cli status
//! ```

use std::process::ExitCode;

use clap::Parser;

use pagewise_lib::cli::{execute, initialize, print_error, Args};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let json = args.json;

    let mut ctx = match initialize(&args).await {
        Ok(ctx) => ctx,
        Err(e) => {
            print_error(&e, json);
            return ExitCode::FAILURE;
        }
    };

    let result = execute(&mut ctx).await;

    // Graceful shutdown
    if let Err(e) = ctx.shutdown().await {
        tracing::warn!("[cli] Shutdown failed: {:#}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e, json);
            ExitCode::FAILURE
        }
    }
}
