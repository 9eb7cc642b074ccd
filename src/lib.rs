//! Pagewise: article simplification, summarization and chat on an on-device
//! model runtime.
//!
//! The layers, bottom up:
//! - [`runtime`]: the host inference engine behind the `HostRuntime` trait,
//!   with an adapter for a local Ollama-compatible server
//! - [`pool`]: a bounded, rate-limited pool of capability sessions
//! - [`chunking`] and [`processor`]: splitting oversized input and running
//!   the chunks sequentially through one pooled session
//! - [`isolation`]: the same pool and processor behind a message boundary,
//!   on a worker thread or in a child process
//! - [`assistant`]: simplify / summarize / chat / generate on top of either

pub mod assistant;
pub mod capability;
pub mod chunking;
pub mod error;
pub mod isolation;
pub mod logging;
pub mod pool;
pub mod processor;
pub mod prompts;
pub mod runtime;
pub mod settings;

#[cfg(feature = "cli")]
pub mod cli;

pub use assistant::{Assistant, Backend, SummaryStyle};
pub use capability::{CapabilityConfig, CapabilityKind};
pub use error::{CapabilityError, Result};
