//! Reading and writing `settings.toml`.
//!
//! Any string value of the form `$NAME` or `${NAME}` is replaced with the
//! environment variable `NAME` at load time, if it is set. Saves go through a
//! sibling temp file and a rename so a crash never leaves a half-written file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::RwLock;

use super::schema::PagewiseSettings;

/// Written by `ensure_settings_file` on first run.
const TEMPLATE: &str = include_str!("template.toml");

/// `~/.pagewise/settings.toml`, unless `PAGEWISE_SETTINGS` names another file.
pub fn settings_path() -> PathBuf {
    match std::env::var_os("PAGEWISE_SETTINGS") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::home_dir()
            .unwrap_or_default()
            .join(".pagewise")
            .join("settings.toml"),
    }
}

/// Owns the settings file and an interpolated in-memory copy of it.
pub struct SettingsManager {
    current: RwLock<PagewiseSettings>,
    path: PathBuf,
}

impl SettingsManager {
    pub async fn new() -> Result<Self> {
        Self::with_path(settings_path()).await
    }

    /// Load from `path`. A missing file yields the defaults.
    pub async fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = read_settings(&path).await?;
        Ok(Self {
            current: RwLock::new(current),
            path,
        })
    }

    pub async fn get(&self) -> PagewiseSettings {
        self.current.read().await.clone()
    }

    /// Look up a value by dot path, e.g. `chunking.max_input_size`.
    pub async fn get_value(&self, key: &str) -> Result<Value> {
        let tree = serde_json::to_value(&*self.current.read().await)?;
        tree.pointer(&json_pointer(key))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown setting '{}'", key))
    }

    /// Change one value by dot path and save. The result must still
    /// deserialize, so a wrong type is rejected before anything is written.
    pub async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let mut current = self.current.write().await;

        let mut tree = serde_json::to_value(&*current)?;
        assign(&mut tree, key, value)?;
        let updated: PagewiseSettings = serde_json::from_value(tree)
            .with_context(|| format!("Invalid value for setting '{}'", key))?;

        self.persist(&updated).await?;
        *current = updated;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the commented template when there is no file yet.
    ///
    /// Returns whether a file was written.
    pub async fn ensure_settings_file(&self) -> Result<bool> {
        if self.exists() {
            return Ok(false);
        }
        create_parent(&self.path).await?;
        tokio::fs::write(&self.path, TEMPLATE)
            .await
            .with_context(|| format!("Failed to write {:?}", self.path))?;
        tracing::info!("[settings] Wrote template to {:?}", self.path);
        Ok(true)
    }

    async fn persist(&self, settings: &PagewiseSettings) -> Result<()> {
        let body = toml::to_string_pretty(settings).context("Failed to encode settings")?;
        create_parent(&self.path).await?;

        let staging = self.path.with_extension("toml.tmp");
        tokio::fs::write(&staging, body)
            .await
            .with_context(|| format!("Failed to write {:?}", staging))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("Failed to replace {:?}", self.path))?;

        tracing::info!("[settings] Saved {:?}", self.path);
        Ok(())
    }
}

async fn read_settings(path: &Path) -> Result<PagewiseSettings> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("[settings] {:?} not found, using defaults", path);
            return Ok(PagewiseSettings::default());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };

    let parsed: PagewiseSettings =
        toml::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))?;

    let mut tree = serde_json::to_value(&parsed)?;
    interpolate(&mut tree);
    let settings = serde_json::from_value(tree)
        .with_context(|| format!("Environment substitution broke {:?}", path))?;

    tracing::debug!("[settings] Loaded {:?}", path);
    Ok(settings)
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    Ok(())
}

/// Substitute environment references in every string of `tree`.
fn interpolate(tree: &mut Value) {
    match tree {
        Value::String(s) => {
            if let Some(resolved) = env_reference(s) {
                *s = resolved;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(interpolate),
        Value::Object(map) => map.values_mut().for_each(interpolate),
        _ => {}
    }
}

/// Value of the variable named by `$NAME` / `${NAME}`, if it is set.
fn env_reference(raw: &str) -> Option<String> {
    let name = raw.trim().strip_prefix('$')?;
    let name = name
        .strip_prefix('{')
        .and_then(|n| n.strip_suffix('}'))
        .unwrap_or(name);
    std::env::var(name).ok()
}

fn json_pointer(key: &str) -> String {
    format!("/{}", key.replace('.', "/"))
}

/// Set `key` inside `tree`. The parent table must exist; the leaf may be
/// new (optional settings are omitted when unset).
fn assign(tree: &mut Value, key: &str, value: Value) -> Result<()> {
    let (parent, leaf) = match key.rsplit_once('.') {
        Some((parent, leaf)) => (json_pointer(parent), leaf),
        None => (String::new(), key),
    };
    if leaf.is_empty() {
        anyhow::bail!("Empty setting key");
    }

    let table = tree
        .pointer_mut(&parent)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| anyhow::anyhow!("Unknown setting '{}'", key))?;
    table.insert(leaf.to_string(), value);
    Ok(())
}

/// First non-empty of: the setting, the listed environment variables in
/// order, then `default`.
pub fn get_with_env_fallback(
    setting: &Option<String>,
    env_vars: &[&str],
    default: Option<String>,
) -> Option<String> {
    setting
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| {
            env_vars
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        })
        .or(default)
}
