// Contracts Module
// Trait boundaries between components, so each can be exercised against a
// fake in tests without spawning a real indexer subprocess.

use async_trait::async_trait;

use crate::error::AppError;
use crate::types::{Community, Entity, Relationship, TextUnit};

/// Read-only accessor for the columnar graph output produced by the indexer.
/// Implemented by `crate::artifact_store::ParquetArtifactStore`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn current_generation(&self) -> crate::types::ArtifactGeneration;

    async fn load_entities(&self, min_degree: Option<u32>) -> Result<Vec<Entity>, AppError>;
    async fn load_relationships(&self) -> Result<Vec<Relationship>, AppError>;
    async fn load_communities(&self, max_level: Option<u32>) -> Result<Vec<Community>, AppError>;
    async fn load_text_units(&self) -> Result<Vec<TextUnit>, AppError>;
    async fn get_entity_by_id(&self, id: &str) -> Result<Entity, AppError>;
    async fn get_related_entities(
        &self,
        entity_id: &str,
    ) -> Result<Vec<(Entity, Relationship)>, AppError>;

    /// Re-scan the output directory for a new generation of artifact files.
    async fn reload(&self) -> Result<(), AppError>;
}

/// Adapts the external graph-retrieval library's global/local search into a
/// cancellable, bounded call. Implemented by
/// `crate::search_gateway::SubprocessSearchBackend`.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn global_search(
        &self,
        query: &str,
        community_level: u32,
        response_type: &str,
    ) -> Result<SearchOutcome, AppError>;

    async fn local_search(
        &self,
        query: &str,
        community_level: u32,
        response_type: &str,
    ) -> Result<SearchOutcome, AppError>;
}

/// Result of one search call, mirroring the subprocess's JSON contract.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchOutcome {
    pub response: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}
