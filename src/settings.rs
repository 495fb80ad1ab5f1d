// Indexer settings snapshot - a typed view over the YAML document the
// indexer itself consumes (§6.2). This backend treats it as read-only
// configuration to surface, never as something it writes.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_chunk_size() -> u32 {
    1200
}

fn default_chunk_overlap() -> u32 {
    100
}

/// A resolved snapshot of the indexer's settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSettings {
    #[serde(default)]
    pub llm_model: String,
    #[serde(default)]
    pub embedding_model: String,
    #[serde(default)]
    pub api_base: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            llm_model: String::new(),
            embedding_model: String::new(),
            api_base: String::new(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl IndexerSettings {
    /// Read and parse the settings document. Parse/read failure is fatal for
    /// the caller on the initial load (see `load_or_default` for reload use).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: IndexerSettings = serde_yaml::from_str(&raw)?;
        Ok(settings)
    }

    /// Re-read the settings document, logging (not propagating) a failure and
    /// keeping the previously resolved snapshot instead, per §3 Settings
    /// snapshot semantics.
    pub fn reload_or_keep(path: &Path, previous: &IndexerSettings) -> IndexerSettings {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "settings reload failed, keeping previous snapshot");
                previous.clone()
            }
        }
    }
}
