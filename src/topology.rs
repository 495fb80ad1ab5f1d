// Graph Topology Projector - builds the reduced node/link view for
// interactive rendering (§4.6).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::contracts::ArtifactStore;
use crate::error::AppError;
use crate::types::{TopologyLink, TopologyNode, TopologyStats, TopologyView};

const DEFAULT_TOP_N: usize = 30;
const MIN_NODE_VAL: i64 = 8;
const MAX_NODE_VAL: i64 = 40;

pub struct TopologyProjector {
    store: Arc<dyn ArtifactStore>,
}

impl TopologyProjector {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub async fn project(&self) -> Result<TopologyView, AppError> {
        let mut entities = self.store.load_entities(None).await?;
        let relationships = self.store.load_relationships().await?;
        let total_entities = entities.len();

        if total_entities == 0 {
            return Ok(TopologyView {
                nodes: Vec::new(),
                links: Vec::new(),
                stats: TopologyStats {
                    total_entities: 0,
                    displayed_nodes: 0,
                    is_empty: true,
                },
            });
        }

        // Top-N by degree descending, tie-break by id ascending.
        entities.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.id.cmp(&b.id)));
        entities.truncate(DEFAULT_TOP_N);

        let selected_titles: HashSet<&str> = entities.iter().map(|e| e.title.as_str()).collect();

        let mut group_ids: HashMap<&str, i64> = HashMap::new();
        let mut next_group = 0i64;
        let max_degree = entities.iter().map(|e| e.degree).max().unwrap_or(1).max(1);

        let nodes = entities
            .iter()
            .map(|entity| {
                let group = *group_ids.entry(entity.entity_type.as_str()).or_insert_with(|| {
                    let id = next_group;
                    next_group += 1;
                    id
                });
                let scaled = (entity.degree as f64 / max_degree as f64 * MAX_NODE_VAL as f64) as i64;
                let val = scaled.clamp(MIN_NODE_VAL, MAX_NODE_VAL);
                TopologyNode {
                    id: entity.title.clone(),
                    group,
                    val,
                }
            })
            .collect::<Vec<_>>();

        let links = relationships
            .iter()
            .filter(|r| selected_titles.contains(r.source.as_str()) && selected_titles.contains(r.target.as_str()))
            .map(|r| TopologyLink {
                source: r.source.clone(),
                target: r.target.clone(),
            })
            .collect();

        let displayed_nodes = nodes.len();

        Ok(TopologyView {
            nodes,
            links,
            stats: TopologyStats {
                total_entities,
                displayed_nodes,
                is_empty: false,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entity, Relationship};
    use async_trait::async_trait;

    struct FakeStore {
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    }

    #[async_trait]
    impl ArtifactStore for FakeStore {
        fn current_generation(&self) -> crate::types::ArtifactGeneration {
            crate::types::ArtifactGeneration(1)
        }
        async fn load_entities(&self, _min_degree: Option<u32>) -> Result<Vec<Entity>, AppError> {
            Ok(self.entities.clone())
        }
        async fn load_relationships(&self) -> Result<Vec<Relationship>, AppError> {
            Ok(self.relationships.clone())
        }
        async fn load_communities(
            &self,
            _max_level: Option<u32>,
        ) -> Result<Vec<crate::types::Community>, AppError> {
            Ok(Vec::new())
        }
        async fn load_text_units(&self) -> Result<Vec<crate::types::TextUnit>, AppError> {
            Ok(Vec::new())
        }
        async fn get_entity_by_id(&self, _id: &str) -> Result<Entity, AppError> {
            Err(AppError::not_found("unused"))
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

    fn entity(id: &str, title: &str, degree: u32) -> Entity {
        Entity {
            id: id.to_string(),
            human_readable_id: id.to_string(),
            title: title.to_string(),
            entity_type: "PERSON".to_string(),
            description: String::new(),
            degree,
        }
    }

    #[tokio::test]
    async fn empty_generation_yields_empty_view() {
        let store = Arc::new(FakeStore {
            entities: Vec::new(),
            relationships: Vec::new(),
        });
        let projector = TopologyProjector::new(store);
        let view = projector.project().await.expect("projects");
        assert!(view.nodes.is_empty());
        assert!(view.links.is_empty());
        assert!(view.stats.is_empty);
    }

    #[tokio::test]
    async fn caps_nodes_at_default_top_n() {
        let entities = (0..45).map(|i| entity(&i.to_string(), &format!("e{i}"), i)).collect();
        let store = Arc::new(FakeStore {
            entities,
            relationships: Vec::new(),
        });
        let projector = TopologyProjector::new(store);
        let view = projector.project().await.expect("projects");
        assert_eq!(view.nodes.len(), DEFAULT_TOP_N);
        assert_eq!(view.stats.total_entities, 45);
        assert_eq!(view.stats.displayed_nodes, DEFAULT_TOP_N);
    }

    #[tokio::test]
    async fn links_only_reference_selected_nodes() {
        let entities = vec![entity("1", "a", 10), entity("2", "b", 5)];
        let relationships = vec![Relationship {
            id: "r1".into(),
            human_readable_id: "1".into(),
            source: "a".into(),
            target: "b".into(),
            description: String::new(),
            weight: 1.0,
            source_degree: 10,
            target_degree: 5,
        }];
        let store = Arc::new(FakeStore {
            entities,
            relationships,
        });
        let projector = TopologyProjector::new(store);
        let view = projector.project().await.expect("projects");
        let node_ids: HashSet<&str> = view.nodes.iter().map(|n| n.id.as_str()).collect();
        for link in &view.links {
            assert!(node_ids.contains(link.source.as_str()));
            assert!(node_ids.contains(link.target.as_str()));
        }
    }
}
