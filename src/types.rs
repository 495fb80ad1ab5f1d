// Domain Types - validated wrappers and record shapes for the knowledge graph
//
// Strongly-typed wrappers enforce invariants at construction time so that
// invalid queries, filenames, or generation pointers can never flow deeper
// into the system. Plain record structs mirror the columnar artifacts the
// indexer produces (see `artifact_store`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A non-empty, length-bounded search/query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedQuery {
    inner: String,
}

impl ValidatedQuery {
    const MAX_LENGTH: usize = 2048;

    /// Create a validated query.
    ///
    /// # Invariants
    /// - Non-empty after trimming
    /// - At most 2048 characters
    pub fn new(query: impl Into<String>) -> Result<Self, crate::error::AppError> {
        let query = query.into();
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(crate::error::AppError::validation("query cannot be empty"));
        }
        if trimmed.len() > Self::MAX_LENGTH {
            return Err(crate::error::AppError::validation(format!(
                "query exceeds maximum length of {} characters",
                Self::MAX_LENGTH
            )));
        }
        Ok(Self {
            inner: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// Monotonically increasing identifier for a published set of indexer output
/// files. Generation `0` never exists on disk — it is the sentinel used
/// before the first successful indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactGeneration(pub u64);

impl ArtifactGeneration {
    pub const NONE: ArtifactGeneration = ArtifactGeneration(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Self {
        ArtifactGeneration(self.0 + 1)
    }
}

impl fmt::Display for ArtifactGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named unit extracted from the source corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub human_readable_id: String,
    pub title: String,
    pub entity_type: String,
    pub description: String,
    pub degree: u32,
}

/// A typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub human_readable_id: String,
    pub source: String,
    pub target: String,
    pub description: String,
    pub weight: f64,
    pub source_degree: u32,
    pub target_degree: u32,
}

/// A relationship annotated with its rank among a bounded top-K selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRelationship {
    #[serde(flatten)]
    pub relationship: Relationship,
    pub rank: usize,
}

/// One finding within a community report, normalized at load time (see
/// §3 Open Question 2 — a bare string becomes `{summary, explanation: ""}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub summary: String,
    #[serde(default)]
    pub explanation: String,
}

/// A cluster of entities produced by community detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub title: String,
    pub level: u32,
    pub rank: f64,
    pub rating: f64,
    pub summary: String,
    pub full_content: String,
    pub rank_explanation: String,
    pub findings: Vec<Finding>,
}

/// A token-bounded chunk of source text retained for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub text: String,
    pub n_tokens: u32,
    pub entity_ids: BTreeSet<String>,
}

/// Lifecycle status of a user-uploaded corpus file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Indexed,
    Error,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexed => "indexed",
            FileStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A user-uploaded corpus file as observed in the input directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub upload_date: DateTime<Utc>,
    pub status: FileStatus,
}

/// The indexing job's state machine position. `Idle` is the only state in
/// which a new `start()` may be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed,
}

/// Ephemeral, singleton record describing the one-at-a-time indexing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub state: JobState,
    pub progress: u8,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_status: Option<i32>,
}

impl Default for IndexJob {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            progress: 0,
            message: String::new(),
            started_at: None,
            finished_at: None,
            exit_status: None,
        }
    }
}

impl IndexJob {
    pub fn is_running(&self) -> bool {
        matches!(self.state, JobState::Starting | JobState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitiesSummary {
    pub total: usize,
    pub types: std::collections::BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommunitiesSummary {
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextUnitsSummary {
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipsSummary {
    pub total: usize,
    pub weight_stats: WeightStats,
}

/// The §4.2 `statistics()` response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub entities: EntitiesSummary,
    pub relationships: RelationshipsSummary,
    pub communities: CommunitiesSummary,
    pub text_units: TextUnitsSummary,
    pub graph_density: f64,
    pub message: String,
}

/// Weighted statistics over the relationship set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

/// One row of the entity-type histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeCount {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub count: usize,
    pub percentage: f64,
}

/// Structural analysis of a single entity, built from facts already present
/// in the generation — never a language-model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceFactor {
    pub related_entity: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAnalysis {
    pub centrality_score: u32,
    pub normalized_centrality: f64,
    pub entity_type: String,
    pub semantic_description: String,
    pub influence_factors: Vec<InfluenceFactor>,
    pub analysis: String,
}

/// One node in the reduced topology view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub group: i64,
    pub val: i64,
}

/// One edge in the reduced topology view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyLink {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyStats {
    pub total_entities: usize,
    pub displayed_nodes: usize,
    #[serde(rename = "isEmpty")]
    pub is_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyView {
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
    pub stats: TopologyStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_query_rejects_blank() {
        assert!(ValidatedQuery::new("   ").is_err());
        assert!(ValidatedQuery::new("").is_err());
    }

    #[test]
    fn validated_query_trims() {
        let q = ValidatedQuery::new("  hello world  ").expect("valid query");
        assert_eq!(q.as_str(), "hello world");
    }

    #[test]
    fn validated_query_rejects_oversized() {
        let long = "x".repeat(ValidatedQuery::MAX_LENGTH + 1);
        assert!(ValidatedQuery::new(long).is_err());
    }

    #[test]
    fn artifact_generation_none_sentinel() {
        assert!(ArtifactGeneration::NONE.is_none());
        assert!(!ArtifactGeneration::NONE.next().is_none());
    }

    #[test]
    fn job_is_running_matches_transient_states() {
        let mut job = IndexJob::default();
        assert!(!job.is_running());
        job.state = JobState::Starting;
        assert!(job.is_running());
        job.state = JobState::Running;
        assert!(job.is_running());
        job.state = JobState::Succeeded;
        assert!(!job.is_running());
    }
}
