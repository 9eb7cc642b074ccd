//! Client for a local Ollama-compatible inference server.
//!
//! Covers the small slice of the API an on-device assistant needs: a liveness
//! probe, listing and pulling models, and non-streaming generation with a
//! continuation context.
//!
//! # Example
//!
//! ```rust,no_run
//! use local_llm_client::{Client, GenerateRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("http://127.0.0.1:11434")?;
//!
//!     if !client.has_model("gemma3").await? {
//!         client.pull("gemma3").await?;
//!     }
//!
//!     let request = GenerateRequest::new("gemma3", "Say hello")
//!         .with_system("You are terse.");
//!     let response = client.generate(&request).await?;
//!     println!("{}", response.response);
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::Client;
pub use error::ClientError;
pub use types::*;
