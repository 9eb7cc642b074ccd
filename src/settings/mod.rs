//! TOML-based settings for Pagewise.
//!
//! Settings are loaded from `~/.pagewise/settings.toml` with environment
//! variable interpolation support, and convert into the pool, chunking and
//! runtime configurations.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pagewise_lib::settings::SettingsManager;
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get().await;
//! let pool_config = settings.pool.to_config();
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_with_env_fallback, settings_path, SettingsManager};
pub use schema::{IsolationMode, PagewiseSettings};
