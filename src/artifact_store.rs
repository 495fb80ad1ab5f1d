// Artifact Store - read-only accessor over the columnar graph output
// produced by the indexer. Hides the on-disk Parquet layout behind typed
// record structs.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::array::{Array, Float64Array, StringArray, UInt32Array};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parking_lot::RwLock;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::contracts::ArtifactStore as ArtifactStoreTrait;
use crate::error::AppError;
use crate::types::{ArtifactGeneration, Community, Entity, Finding, Relationship, TextUnit};

const ENTITIES_FILE: &str = "entities.parquet";
const RELATIONSHIPS_FILE: &str = "relationships.parquet";
const COMMUNITIES_FILE: &str = "communities.parquet";
const COMMUNITY_REPORTS_FILE: &str = "community_reports.parquet";
const TEXT_UNITS_FILE: &str = "text_units.parquet";
const NODES_FILE: &str = "nodes.parquet";

const REQUIRED_FILES: &[&str] = &[
    ENTITIES_FILE,
    RELATIONSHIPS_FILE,
    COMMUNITIES_FILE,
    COMMUNITY_REPORTS_FILE,
    TEXT_UNITS_FILE,
    NODES_FILE,
];

/// Parquet-backed Artifact Store (§4.1). The full set of required files
/// must be present for a generation to be considered published; partial
/// presence is reported as "no artifacts available", never a partial
/// generation (§4.1 Key algorithms — generation discovery).
pub struct ParquetArtifactStore {
    output_dir: PathBuf,
    generation: AtomicU64,
    cached: RwLock<Option<Arc<GenerationData>>>,
}

struct GenerationData {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    communities: Vec<Community>,
    text_units: Vec<TextUnit>,
}

impl ParquetArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let store = Self {
            output_dir: output_dir.into(),
            generation: AtomicU64::new(0),
            cached: RwLock::new(None),
        };
        if let Err(err) = store.rescan() {
            tracing::warn!(error = %err, "initial artifact scan failed");
        }
        store
    }

    fn all_files_present(&self) -> bool {
        REQUIRED_FILES
            .iter()
            .all(|f| self.output_dir.join(f).is_file())
    }

    /// Re-scan the output directory and, if a complete set of files is
    /// present, load and publish a new generation atomically.
    fn rescan(&self) -> Result<(), AppError> {
        if !self.all_files_present() {
            *self.cached.write() = None;
            return Ok(());
        }

        let entities = load_entities_file(&self.output_dir.join(ENTITIES_FILE))?;
        let relationships = load_relationships_file(&self.output_dir.join(RELATIONSHIPS_FILE))?;
        let communities = load_communities_file(
            &self.output_dir.join(COMMUNITIES_FILE),
            &self.output_dir.join(COMMUNITY_REPORTS_FILE),
        )?;
        let text_units = load_text_units_file(&self.output_dir.join(TEXT_UNITS_FILE))?;

        let data = Arc::new(GenerationData {
            entities,
            relationships,
            communities,
            text_units,
        });

        // Publish atomically: readers either see the whole new generation or
        // the whole previous one, never a mix (§3 Invariant 3).
        *self.cached.write() = Some(data);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn snapshot(&self) -> Option<Arc<GenerationData>> {
        self.cached.read().clone()
    }
}

#[async_trait]
impl ArtifactStoreTrait for ParquetArtifactStore {
    fn current_generation(&self) -> ArtifactGeneration {
        ArtifactGeneration(self.generation.load(Ordering::SeqCst))
    }

    async fn load_entities(&self, min_degree: Option<u32>) -> Result<Vec<Entity>, AppError> {
        let Some(data) = self.snapshot() else {
            return Ok(Vec::new());
        };
        let entities = match min_degree {
            Some(min) => data
                .entities
                .iter()
                .filter(|e| e.degree >= min)
                .cloned()
                .collect(),
            None => data.entities.clone(),
        };
        Ok(entities)
    }

    async fn load_relationships(&self) -> Result<Vec<Relationship>, AppError> {
        Ok(self
            .snapshot()
            .map(|d| d.relationships.clone())
            .unwrap_or_default())
    }

    async fn load_communities(&self, max_level: Option<u32>) -> Result<Vec<Community>, AppError> {
        let Some(data) = self.snapshot() else {
            return Ok(Vec::new());
        };
        let mut communities: Vec<Community> = match max_level {
            Some(max) => data
                .communities
                .iter()
                .filter(|c| c.level <= max)
                .cloned()
                .collect(),
            None => data.communities.clone(),
        };
        communities.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(communities)
    }

    async fn load_text_units(&self) -> Result<Vec<TextUnit>, AppError> {
        Ok(self
            .snapshot()
            .map(|d| d.text_units.clone())
            .unwrap_or_default())
    }

    async fn get_entity_by_id(&self, id: &str) -> Result<Entity, AppError> {
        let data = self
            .snapshot()
            .ok_or_else(|| AppError::not_ready("no artifact generation is available"))?;
        data.entities
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("entity not found: {id}")))
    }

    async fn get_related_entities(
        &self,
        entity_id: &str,
    ) -> Result<Vec<(Entity, Relationship)>, AppError> {
        let data = self
            .snapshot()
            .ok_or_else(|| AppError::not_ready("no artifact generation is available"))?;

        let entity = data
            .entities
            .iter()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| AppError::not_found(format!("entity not found: {entity_id}")))?;

        // Index entities by title for the join; on duplicate titles prefer
        // the highest degree, tie-break by smallest id (§4.1 Key algorithms).
        let mut by_title: HashMap<&str, &Entity> = HashMap::new();
        for candidate in &data.entities {
            by_title
                .entry(candidate.title.as_str())
                .and_modify(|current| {
                    if candidate.degree > current.degree
                        || (candidate.degree == current.degree && candidate.id < current.id)
                    {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }

        let mut neighbors = Vec::new();
        for rel in &data.relationships {
            let neighbor_title = if rel.source == entity.title {
                Some(rel.target.as_str())
            } else if rel.target == entity.title {
                Some(rel.source.as_str())
            } else {
                None
            };
            if let Some(title) = neighbor_title {
                if let Some(neighbor) = by_title.get(title) {
                    neighbors.push(((*neighbor).clone(), rel.clone()));
                }
            }
        }
        Ok(neighbors)
    }

    async fn reload(&self) -> Result<(), AppError> {
        self.rescan()
    }
}

fn open_reader(path: &Path) -> Result<Vec<RecordBatch>, AppError> {
    let file = std::fs::File::open(path)
        .map_err(|e| AppError::upstream(format!("cannot open {}: {e}", path.display())))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| AppError::upstream(format!("cannot read parquet {}: {e}", path.display())))?;
    let reader = builder
        .build()
        .map_err(|e| AppError::upstream(format!("cannot build reader {}: {e}", path.display())))?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::upstream(format!("error reading {}: {e}", path.display())))
}

fn string_col(batch: &RecordBatch, name: &str) -> Result<Arc<StringArray>, AppError> {
    let idx = batch.schema().index_of(name).map_err(|_| {
        AppError::internal(format!("missing column '{name}' in artifact file"))
    })?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .map(|a| Arc::new(a.clone()))
        .ok_or_else(|| AppError::internal(format!("column '{name}' is not a string column")))
}

fn u32_col(batch: &RecordBatch, name: &str) -> Result<Arc<UInt32Array>, AppError> {
    let idx = batch.schema().index_of(name).map_err(|_| {
        AppError::internal(format!("missing column '{name}' in artifact file"))
    })?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<UInt32Array>()
        .map(|a| Arc::new(a.clone()))
        .ok_or_else(|| AppError::internal(format!("column '{name}' is not a u32 column")))
}

fn f64_col(batch: &RecordBatch, name: &str) -> Result<Arc<Float64Array>, AppError> {
    let idx = batch.schema().index_of(name).map_err(|_| {
        AppError::internal(format!("missing column '{name}' in artifact file"))
    })?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Float64Array>()
        .map(|a| Arc::new(a.clone()))
        .ok_or_else(|| AppError::internal(format!("column '{name}' is not a float column")))
}

fn str_at(col: &StringArray, i: usize) -> String {
    if col.is_null(i) {
        String::new()
    } else {
        col.value(i).to_string()
    }
}

fn u32_at(col: &UInt32Array, i: usize) -> u32 {
    if col.is_null(i) {
        0
    } else {
        col.value(i)
    }
}

fn f64_at(col: &Float64Array, i: usize) -> f64 {
    if col.is_null(i) {
        0.0
    } else {
        col.value(i)
    }
}

fn load_entities_file(path: &Path) -> Result<Vec<Entity>, AppError> {
    let mut out = Vec::new();
    for batch in open_reader(path)? {
        let id = string_col(&batch, "id")?;
        let human_readable_id = string_col(&batch, "human_readable_id")?;
        let title = string_col(&batch, "title")?;
        let entity_type = string_col(&batch, "type")?;
        let description = string_col(&batch, "description")?;
        let degree = u32_col(&batch, "degree")?;
        for i in 0..batch.num_rows() {
            out.push(Entity {
                id: str_at(&id, i),
                human_readable_id: str_at(&human_readable_id, i),
                title: str_at(&title, i),
                entity_type: str_at(&entity_type, i),
                description: str_at(&description, i),
                degree: u32_at(&degree, i),
            });
        }
    }
    Ok(out)
}

fn load_relationships_file(path: &Path) -> Result<Vec<Relationship>, AppError> {
    let mut out = Vec::new();
    for batch in open_reader(path)? {
        let id = string_col(&batch, "id")?;
        let human_readable_id = string_col(&batch, "human_readable_id")?;
        let source = string_col(&batch, "source")?;
        let target = string_col(&batch, "target")?;
        let description = string_col(&batch, "description")?;
        let weight = f64_col(&batch, "weight")?;
        let source_degree = u32_col(&batch, "source_degree")?;
        let target_degree = u32_col(&batch, "target_degree")?;
        for i in 0..batch.num_rows() {
            out.push(Relationship {
                id: str_at(&id, i),
                human_readable_id: str_at(&human_readable_id, i),
                source: str_at(&source, i),
                target: str_at(&target, i),
                description: str_at(&description, i),
                weight: f64_at(&weight, i),
                source_degree: u32_at(&source_degree, i),
                target_degree: u32_at(&target_degree, i),
            });
        }
    }
    Ok(out)
}

/// Normalize a `findings` cell, which the indexer may emit as a JSON array
/// of strings or of `{summary, explanation}` objects (§3 Finding
/// normalization).
fn parse_findings(raw: &str) -> Vec<Finding> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => Finding {
                summary: s.clone(),
                explanation: String::new(),
            },
            serde_json::Value::Object(_) => Finding {
                summary: item
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                explanation: item
                    .get("explanation")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            _ => Finding {
                summary: String::new(),
                explanation: String::new(),
            },
        })
        .collect()
}

fn load_communities_file(
    communities_path: &Path,
    reports_path: &Path,
) -> Result<Vec<Community>, AppError> {
    // community_reports.parquet carries the summary/findings text, joined
    // here against communities.parquet by community id.
    let mut reports: HashMap<String, (String, String, String, Vec<Finding>)> = HashMap::new();
    for batch in open_reader(reports_path)? {
        let id = string_col(&batch, "community")?;
        let summary = string_col(&batch, "summary")?;
        let full_content = string_col(&batch, "full_content")?;
        let rank_explanation = string_col(&batch, "rank_explanation")?;
        let findings = string_col(&batch, "findings")?;
        for i in 0..batch.num_rows() {
            reports.insert(
                str_at(&id, i),
                (
                    str_at(&summary, i),
                    str_at(&full_content, i),
                    str_at(&rank_explanation, i),
                    parse_findings(&str_at(&findings, i)),
                ),
            );
        }
    }

    let mut out = Vec::new();
    for batch in open_reader(communities_path)? {
        let id = string_col(&batch, "id")?;
        let title = string_col(&batch, "title")?;
        let level = u32_col(&batch, "level")?;
        let rank = f64_col(&batch, "rank")?;
        let rating = f64_col(&batch, "rating")?;
        for i in 0..batch.num_rows() {
            let cid = str_at(&id, i);
            let (summary, full_content, rank_explanation, findings) = reports
                .get(&cid)
                .cloned()
                .unwrap_or_else(|| (String::new(), String::new(), String::new(), Vec::new()));
            out.push(Community {
                id: cid,
                title: str_at(&title, i),
                level: u32_at(&level, i),
                rank: f64_at(&rank, i),
                rating: f64_at(&rating, i),
                summary,
                full_content,
                rank_explanation,
                findings,
            });
        }
    }
    Ok(out)
}

fn load_text_units_file(path: &Path) -> Result<Vec<TextUnit>, AppError> {
    let mut out = Vec::new();
    for batch in open_reader(path)? {
        let id = string_col(&batch, "id")?;
        let text = string_col(&batch, "text")?;
        let n_tokens = u32_col(&batch, "n_tokens")?;
        let entity_ids = string_col(&batch, "entity_ids")?;
        for i in 0..batch.num_rows() {
            let ids_raw = str_at(&entity_ids, i);
            let ids: BTreeSet<String> = ids_raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            out.push(TextUnit {
                id: str_at(&id, i),
                text: str_at(&text, i),
                n_tokens: u32_at(&n_tokens, i),
                entity_ids: ids,
            });
        }
    }
    Ok(out)
}
