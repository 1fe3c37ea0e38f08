//! Relationship graph traversal
//!
//! Bounded BFS over the directed relationship edges; `related_entities`
//! follows outgoing edges, `graph` collects the undirected neighbourhood
//! within a radius.

use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

use sentinel_core::{KnowledgeEntity, KnowledgeRelationship, Result};

use crate::store::EntityStore;
use crate::KnowledgeError;

/// An entity reachable from the start node, with the edge that led to it.
#[derive(Debug, Clone)]
pub struct RelatedEntity {
    pub entity: KnowledgeEntity,
    pub relationship_type: String,
    pub depth: usize,
}

/// Neighbourhood subgraph around one entity.
#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    pub root: Uuid,
    pub nodes: Vec<KnowledgeEntity>,
    pub edges: Vec<KnowledgeRelationship>,
}

/// Outgoing-edge BFS up to `max_depth`, optionally filtered by
/// relationship type. Deterministic order: depth first, then entity id.
pub async fn related_entities(
    store: &dyn EntityStore,
    start: Uuid,
    relationship_type: Option<&str>,
    max_depth: usize,
) -> Result<Vec<RelatedEntity>> {
    if !store.contains(start).await? {
        return Err(KnowledgeError::EntityNotFound(start).into());
    }

    let mut visited: HashSet<Uuid> = HashSet::from([start]);
    let mut queue: VecDeque<(Uuid, usize)> = VecDeque::from([(start, 0)]);
    let mut found: Vec<RelatedEntity> = Vec::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let mut edges = store.relationships_from(current).await?;
        edges.sort_by(|a, b| a.target_id.cmp(&b.target_id));

        for edge in edges {
            if relationship_type.map(|t| edge.relationship_type != t).unwrap_or(false) {
                continue;
            }
            if !visited.insert(edge.target_id) {
                continue;
            }
            if let Some(entity) = store.get(edge.target_id).await? {
                found.push(RelatedEntity {
                    entity,
                    relationship_type: edge.relationship_type.clone(),
                    depth: depth + 1,
                });
                queue.push_back((edge.target_id, depth + 1));
            }
        }
    }

    found.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| a.entity.entity_id.cmp(&b.entity.entity_id))
    });
    Ok(found)
}

/// Undirected neighbourhood within `radius` hops.
pub async fn graph(store: &dyn EntityStore, root: Uuid, radius: usize) -> Result<KnowledgeGraph> {
    let Some(root_entity) = store.get(root).await? else {
        return Err(KnowledgeError::EntityNotFound(root).into());
    };

    let mut visited: HashSet<Uuid> = HashSet::from([root]);
    let mut queue: VecDeque<(Uuid, usize)> = VecDeque::from([(root, 0)]);
    let mut nodes = vec![root_entity];
    let mut edges: Vec<KnowledgeRelationship> = Vec::new();
    let mut seen_edges: HashSet<(Uuid, Uuid, String)> = HashSet::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= radius {
            continue;
        }
        let mut incident = store.relationships_of(current).await?;
        incident.sort_by(|a, b| {
            a.source_id
                .cmp(&b.source_id)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });

        for edge in incident {
            let key = (edge.source_id, edge.target_id, edge.relationship_type.clone());
            if seen_edges.insert(key) {
                edges.push(edge.clone());
            }
            let neighbour = if edge.source_id == current {
                edge.target_id
            } else {
                edge.source_id
            };
            if visited.insert(neighbour) {
                if let Some(entity) = store.get(neighbour).await? {
                    nodes.push(entity);
                    queue.push_back((neighbour, depth + 1));
                }
            }
        }
    }

    nodes.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    Ok(KnowledgeGraph { root, nodes, edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEntityStore;
    use sentinel_core::{KnowledgeDomain, KnowledgeType};

    async fn chain(store: &InMemoryEntityStore, len: usize) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for i in 0..len {
            let entity = KnowledgeEntity::new(
                KnowledgeDomain::LegalFrameworks,
                KnowledgeType::Rule,
                format!("rule {i}"),
                "content",
            );
            ids.push(entity.entity_id);
            store.put(&entity).await.unwrap();
        }
        for pair in ids.windows(2) {
            store
                .upsert_relationship(&KnowledgeRelationship::new(pair[0], pair[1], "cites"))
                .await
                .unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn test_bfs_depth_bound() {
        let store = InMemoryEntityStore::new();
        let ids = chain(&store, 4).await;

        let related = related_entities(&store, ids[0], None, 2).await.unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].entity.entity_id, ids[1]);
        assert_eq!(related[0].depth, 1);
        assert_eq!(related[1].entity.entity_id, ids[2]);
        assert_eq!(related[1].depth, 2);
    }

    #[tokio::test]
    async fn test_type_filter() {
        let store = InMemoryEntityStore::new();
        let ids = chain(&store, 2).await;
        let related = related_entities(&store, ids[0], Some("supersedes"), 3)
            .await
            .unwrap();
        assert!(related.is_empty());
    }

    #[tokio::test]
    async fn test_graph_is_undirected() {
        let store = InMemoryEntityStore::new();
        let ids = chain(&store, 3).await;

        // From the middle node, both neighbours are in radius 1.
        let graph = graph(&store, ids[1], 1).await.unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_start_is_not_found() {
        let store = InMemoryEntityStore::new();
        let err = related_entities(&store, Uuid::new_v4(), None, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, sentinel_core::Error::NotFound(_)));
    }
}
