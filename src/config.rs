//! YAML configuration
//!
//! Settings are optional throughout: a missing file, table, or key
//! falls back to built-in defaults, so a bare install needs no config
//! at all. Accessor methods own the defaults; the structs stay thin.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const CONFIG_FILE: &str = "recall.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file location; unset means the user data dir.
    pub path: Option<String>,
}

/// Per-adapter table, keyed by adapter name
/// (`jsonl`, `split`, `plain`, `git`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Unset counts as enabled.
    pub enabled: Option<bool>,

    pub base_path: Option<String>,

    /// Git only: `me` restricts history to the local author identity,
    /// `all` ingests every commit.
    pub author_scope: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    pub debounce_ms: Option<u64>,
    pub split_poll_secs: Option<u64>,
    pub rediscover_secs: Option<u64>,
}

impl WatchConfig {
    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms.unwrap_or(100)
    }

    pub fn split_poll_secs(&self) -> u64 {
        self.split_poll_secs.unwrap_or(5)
    }

    pub fn rediscover_secs(&self) -> u64 {
        self.rediscover_secs.unwrap_or(30)
    }
}

impl Config {
    /// Read settings from YAML. The explicitly named file wins when it
    /// exists; after that, a `recall.yaml` next to the working
    /// directory, then one under the user config dir. No file at all
    /// just means defaults.
    pub fn load(explicit: &str) -> Result<Self> {
        for candidate in Self::candidates(explicit) {
            if !candidate.is_file() {
                continue;
            }
            let raw = std::fs::read_to_string(&candidate)?;
            return Ok(serde_yaml::from_str(&raw)?);
        }
        Ok(Self::default())
    }

    fn candidates(explicit: &str) -> Vec<PathBuf> {
        let mut out = vec![expand(explicit), PathBuf::from(CONFIG_FILE)];
        if let Some(base) = dirs::config_dir() {
            out.push(base.join("recall").join(CONFIG_FILE));
        }
        out
    }

    /// Resolved database file location.
    pub fn database_path(&self) -> PathBuf {
        match &self.database.path {
            Some(p) => expand(p),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("recall")
                .join("recall.db"),
        }
    }

    pub fn adapter_enabled(&self, name: &str) -> bool {
        self.adapters
            .get(name)
            .and_then(|a| a.enabled)
            .unwrap_or(true)
    }

    /// Configured base path override for an adapter, if any.
    pub fn adapter_path(&self, name: &str) -> Option<PathBuf> {
        let raw = self.adapters.get(name)?.base_path.as_deref()?;
        Some(expand(raw))
    }

    pub fn git_author_scope(&self) -> crate::adapter::AuthorScope {
        match self
            .adapters
            .get("git")
            .and_then(|a| a.author_scope.as_deref())
        {
            Some("all") => crate::adapter::AuthorScope::All,
            _ => crate::adapter::AuthorScope::Me,
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
