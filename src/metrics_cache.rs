// Derived-Metrics Cache - memoizes full-table-scan aggregations, keyed by
// the artifact generation they were computed against (§4.2).
//
// Each memoized slot pairs its value with one `tokio::sync::Mutex` used only
// to serialize concurrent recomputation of that slot; misses on different
// slots proceed fully in parallel (§5 Cache inflight dedup).

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::contracts::ArtifactStore;
use crate::error::AppError;
use crate::types::{
    ArtifactGeneration, EntityAnalysis, EntityTypeCount, InfluenceFactor, RankedRelationship,
    Statistics, WeightStats,
};

#[derive(Clone)]
struct Tagged<V> {
    generation: ArtifactGeneration,
    value: V,
}

/// Amortizes statistics/histogram/top-K/entity-analysis computation across
/// concurrent requests within one artifact generation.
pub struct MetricsCache {
    store: Arc<dyn ArtifactStore>,
    statistics: DashMap<(), Tagged<Statistics>>,
    histogram: DashMap<(), Tagged<Vec<EntityTypeCount>>>,
    top_relationships: DashMap<usize, Tagged<Vec<RankedRelationship>>>,
    entity_analysis: DashMap<String, Tagged<EntityAnalysis>>,
    statistics_lock: AsyncMutex<()>,
    histogram_lock: AsyncMutex<()>,
    top_relationships_locks: DashMap<usize, Arc<AsyncMutex<()>>>,
    entity_analysis_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl MetricsCache {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            statistics: DashMap::new(),
            histogram: DashMap::new(),
            top_relationships: DashMap::new(),
            entity_analysis: DashMap::new(),
            statistics_lock: AsyncMutex::new(()),
            histogram_lock: AsyncMutex::new(()),
            top_relationships_locks: DashMap::new(),
            entity_analysis_locks: DashMap::new(),
        }
    }

    /// Drop all memoized entries. Generation tagging alone would make this
    /// unnecessary for correctness, but an explicit `invalidate()` bounds
    /// memory use across many generations (§4.2 Public contract).
    pub fn invalidate(&self) {
        self.statistics.clear();
        self.histogram.clear();
        self.top_relationships.clear();
        self.entity_analysis.clear();
    }

    pub async fn statistics(&self) -> Result<Statistics, AppError> {
        let generation = self.store.current_generation();
        if let Some(entry) = self.statistics.get(&()) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let _guard = self.statistics_lock.lock().await;
        if let Some(entry) = self.statistics.get(&()) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let value = self.compute_statistics().await?;
        self.statistics.insert(
            (),
            Tagged {
                generation,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    async fn compute_statistics(&self) -> Result<Statistics, AppError> {
        let entities = self.store.load_entities(None).await?;
        let relationships = self.store.load_relationships().await?;
        let communities = self.store.load_communities(None).await?;
        let text_units = self.store.load_text_units().await?;

        let mut entity_types: BTreeMap<String, usize> = BTreeMap::new();
        for entity in &entities {
            *entity_types.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }

        let weight_stats = weight_stats(&relationships);

        let n = entities.len() as f64;
        let graph_density = if entities.len() >= 2 {
            2.0 * relationships.len() as f64 / (n * (n - 1.0))
        } else {
            0.0
        };

        Ok(Statistics {
            entities: crate::types::EntitiesSummary {
                total: entities.len(),
                types: entity_types,
            },
            relationships: crate::types::RelationshipsSummary {
                total: relationships.len(),
                weight_stats,
            },
            communities: crate::types::CommunitiesSummary {
                total: communities.len(),
            },
            text_units: crate::types::TextUnitsSummary {
                total: text_units.len(),
            },
            graph_density,
            message: "ok".to_string(),
        })
    }

    pub async fn entity_type_histogram(&self) -> Result<Vec<EntityTypeCount>, AppError> {
        let generation = self.store.current_generation();
        if let Some(entry) = self.histogram.get(&()) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let _guard = self.histogram_lock.lock().await;
        if let Some(entry) = self.histogram.get(&()) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let entities = self.store.load_entities(None).await?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entity in &entities {
            *counts.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }
        let total = entities.len() as f64;
        let mut histogram: Vec<EntityTypeCount> = counts
            .into_iter()
            .map(|(entity_type, count)| EntityTypeCount {
                entity_type,
                count,
                percentage: if total > 0.0 {
                    100.0 * count as f64 / total
                } else {
                    0.0
                },
            })
            .collect();
        histogram.sort_by(|a, b| b.count.cmp(&a.count));

        self.histogram.insert(
            (),
            Tagged {
                generation,
                value: histogram.clone(),
            },
        );
        Ok(histogram)
    }

    pub async fn top_relationships(&self, k: usize) -> Result<Vec<RankedRelationship>, AppError> {
        let generation = self.store.current_generation();
        if let Some(entry) = self.top_relationships.get(&k) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let lock = self
            .top_relationships_locks
            .entry(k)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if let Some(entry) = self.top_relationships.get(&k) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let mut relationships = self.store.load_relationships().await?;
        relationships.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
        });
        let ranked: Vec<RankedRelationship> = relationships
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, relationship)| RankedRelationship {
                relationship,
                rank: i + 1,
            })
            .collect();

        self.top_relationships.insert(
            k,
            Tagged {
                generation,
                value: ranked.clone(),
            },
        );
        Ok(ranked)
    }

    pub async fn entity_analysis(&self, entity_id: &str) -> Result<EntityAnalysis, AppError> {
        let generation = self.store.current_generation();
        if let Some(entry) = self.entity_analysis.get(entity_id) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let lock = self
            .entity_analysis_locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if let Some(entry) = self.entity_analysis.get(entity_id) {
            if entry.generation == generation {
                return Ok(entry.value.clone());
            }
        }

        let entity = self.store.get_entity_by_id(entity_id).await?;
        let neighbors = self.store.get_related_entities(entity_id).await?;
        let all_entities = self.store.load_entities(None).await?;
        let max_degree = all_entities.iter().map(|e| e.degree).max().unwrap_or(0);

        let normalized_centrality = if max_degree > 0 {
            entity.degree as f64 / max_degree as f64
        } else {
            0.0
        };

        let influence_factors: Vec<InfluenceFactor> = neighbors
            .iter()
            .map(|(neighbor, relationship)| InfluenceFactor {
                related_entity: neighbor.title.clone(),
                description: relationship.description.clone(),
            })
            .collect();

        let semantic_description = format!(
            "{} is a {} entity connected to {} other entities in the current graph.",
            entity.title,
            entity.entity_type,
            neighbors.len()
        );

        let analysis = format!(
            "Centrality score {} places this entity at the {:.1}% percentile of connectivity within its generation.",
            entity.degree,
            normalized_centrality * 100.0
        );

        let result = EntityAnalysis {
            centrality_score: entity.degree,
            normalized_centrality,
            entity_type: entity.entity_type.clone(),
            semantic_description,
            influence_factors,
            analysis,
        };

        self.entity_analysis.insert(
            entity_id.to_string(),
            Tagged {
                generation,
                value: result.clone(),
            },
        );
        Ok(result)
    }
}

/// `min/max/mean/median` over relationship weights, lower-median convention
/// for even-sized sets (§4.2 Key algorithms).
fn weight_stats(relationships: &[crate::types::Relationship]) -> WeightStats {
    if relationships.is_empty() {
        return WeightStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            median: 0.0,
        };
    }
    let mut weights: Vec<f64> = relationships.iter().map(|r| r.weight).collect();
    weights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let min = weights[0];
    let max = weights[weights.len() - 1];
    let mean = weights.iter().sum::<f64>() / weights.len() as f64;
    let median = weights[(weights.len() - 1) / 2];

    WeightStats {
        min,
        max,
        mean,
        median,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Community, Entity, Relationship, TextUnit};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        generation: std::sync::atomic::AtomicU64,
        entities: Mutex<Vec<Entity>>,
        relationships: Mutex<Vec<Relationship>>,
    }

    #[async_trait]
    impl ArtifactStore for FakeStore {
        fn current_generation(&self) -> ArtifactGeneration {
            ArtifactGeneration(self.generation.load(std::sync::atomic::Ordering::SeqCst))
        }
        async fn load_entities(&self, _min_degree: Option<u32>) -> Result<Vec<Entity>, AppError> {
            Ok(self.entities.lock().unwrap().clone())
        }
        async fn load_relationships(&self) -> Result<Vec<Relationship>, AppError> {
            Ok(self.relationships.lock().unwrap().clone())
        }
        async fn load_communities(&self, _max_level: Option<u32>) -> Result<Vec<Community>, AppError> {
            Ok(Vec::new())
        }
        async fn load_text_units(&self) -> Result<Vec<TextUnit>, AppError> {
            Ok(Vec::new())
        }
        async fn get_entity_by_id(&self, id: &str) -> Result<Entity, AppError> {
            self.entities
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| AppError::not_found("no such entity"))
        }
        async fn get_related_entities(
            &self,
            _entity_id: &str,
        ) -> Result<Vec<(Entity, Relationship)>, AppError> {
            Ok(Vec::new())
        }
        async fn reload(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn entity(id: &str, title: &str, degree: u32, etype: &str) -> Entity {
        Entity {
            id: id.to_string(),
            human_readable_id: id.to_string(),
            title: title.to_string(),
            entity_type: etype.to_string(),
            description: String::new(),
            degree,
        }
    }

    #[tokio::test]
    async fn statistics_density_zero_with_fewer_than_two_entities() {
        let store = Arc::new(FakeStore::default());
        let cache = MetricsCache::new(store);
        let stats = cache.statistics().await.expect("computes");
        assert_eq!(stats.graph_density, 0.0);
        assert_eq!(stats.entities.total, 0);
    }

    #[tokio::test]
    async fn histogram_counts_and_percentages_sum_correctly() {
        let store = Arc::new(FakeStore::default());
        *store.entities.lock().unwrap() = vec![
            entity("1", "a", 1, "PERSON"),
            entity("2", "b", 2, "PERSON"),
            entity("3", "c", 3, "ORG"),
        ];
        let cache = MetricsCache::new(store);
        let histogram = cache.entity_type_histogram().await.expect("computes");
        let total_count: usize = histogram.iter().map(|h| h.count).sum();
        assert_eq!(total_count, 3);
        let total_pct: f64 = histogram.iter().map(|h| h.percentage).sum();
        assert!((total_pct - 100.0).abs() < 0.1);
        assert!(histogram[0].count >= histogram[1].count);
    }

    #[tokio::test]
    async fn top_relationships_bounded_and_ranked() {
        let store = Arc::new(FakeStore::default());
        *store.relationships.lock().unwrap() = vec![
            Relationship {
                id: "r1".into(),
                human_readable_id: "1".into(),
                source: "a".into(),
                target: "b".into(),
                description: String::new(),
                weight: 5.0,
                source_degree: 1,
                target_degree: 1,
            },
            Relationship {
                id: "r2".into(),
                human_readable_id: "2".into(),
                source: "b".into(),
                target: "c".into(),
                description: String::new(),
                weight: 9.0,
                source_degree: 1,
                target_degree: 1,
            },
        ];
        let cache = MetricsCache::new(store);
        let top = cache.top_relationships(1).await.expect("computes");
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].relationship.id, "r2");
        assert_eq!(top[0].rank, 1);
    }

    #[test]
    fn weight_stats_uses_lower_median_for_even_sets() {
        let relationships = vec![
            Relationship {
                id: "1".into(),
                human_readable_id: "1".into(),
                source: "a".into(),
                target: "b".into(),
                description: String::new(),
                weight: 1.0,
                source_degree: 0,
                target_degree: 0,
            },
            Relationship {
                id: "2".into(),
                human_readable_id: "2".into(),
                source: "a".into(),
                target: "b".into(),
                description: String::new(),
                weight: 2.0,
                source_degree: 0,
                target_degree: 0,
            },
        ];
        let stats = weight_stats(&relationships);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 2.0);
        assert_eq!(stats.median, 1.0); // lower median of [1.0, 2.0]
    }
}
