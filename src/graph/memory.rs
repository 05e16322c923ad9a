//! In-memory graph store for tests, demos and dry runs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::{validate_edge, Direction, Label, PropertyValue, Relation, Vertex, VertexKey};
use super::store::GraphStore;
use crate::error::{FraudGraphError, Result};

type Adjacency = BTreeMap<(VertexKey, Relation), BTreeSet<VertexKey>>;

/// Vertices plus edges indexed from both ends, so degree and neighbour
/// lookups touch only the vertex's own adjacency set.
#[derive(Default)]
struct Graph {
    vertices: BTreeMap<VertexKey, Vertex>,
    outgoing: Adjacency,
    incoming: Adjacency,
}

impl Graph {
    fn adjacent(&self, key: &VertexKey, relation: Relation, direction: Direction) -> Option<&BTreeSet<VertexKey>> {
        let index = match direction {
            Direction::Out => &self.outgoing,
            Direction::In => &self.incoming,
        };
        index.get(&(key.clone(), relation))
    }

    fn degree(&self, key: &VertexKey, relation: Relation, direction: Direction) -> usize {
        self.adjacent(key, relation, direction).map_or(0, BTreeSet::len)
    }

    fn insert_edge(&mut self, from: &VertexKey, to: &VertexKey, relation: Relation) -> bool {
        let created = self
            .outgoing
            .entry((from.clone(), relation))
            .or_default()
            .insert(to.clone());
        self.incoming
            .entry((to.clone(), relation))
            .or_default()
            .insert(from.clone());
        created
    }

    /// Vertices of one label, walked via the key ordering
    fn with_label(&self, label: Label) -> impl Iterator<Item = (&VertexKey, &Vertex)> {
        self.vertices
            .range(VertexKey::new(label, "")..)
            .take_while(move |(key, _)| key.label == label)
    }

    fn edge_count(&self, relation: Option<Relation>) -> usize {
        self.outgoing
            .iter()
            .filter(|((_, rel), _)| relation.map_or(true, |r| *rel == r))
            .map(|(_, targets)| targets.len())
            .sum()
    }
}

/// Equality as SQLite's `json_extract` sees it: `1` and `1.0` are the same number.
fn same_value(stored: &PropertyValue, wanted: &PropertyValue) -> bool {
    match (stored.as_f64(), wanted.as_f64()) {
        (Some(a), Some(b)) if stored.is_number() && wanted.is_number() => a == b,
        _ => stored == wanted,
    }
}

#[derive(Default)]
pub struct MemoryGraphStore {
    graph: RwLock<Graph>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_natural_key(mut vertices: Vec<Vertex>) -> Vec<Vertex> {
    vertices.sort_by(|a, b| a.natural_key().cmp(b.natural_key()));
    vertices
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_vertex(&self, vertex: Vertex) -> Result<Vertex> {
        vertex.validate()?;
        let mut graph = self.graph.write().await;
        graph.vertices.insert(vertex.key(), vertex.clone());
        Ok(vertex)
    }

    async fn add_edge(&self, from: &VertexKey, to: &VertexKey, relation: Relation) -> Result<bool> {
        validate_edge(from, to, relation)?;
        let mut graph = self.graph.write().await;
        for endpoint in [from, to] {
            if !graph.vertices.contains_key(endpoint) {
                return Err(FraudGraphError::Query(format!(
                    "edge endpoint {} does not exist",
                    endpoint
                )));
            }
        }
        Ok(graph.insert_edge(from, to, relation))
    }

    async fn find_vertex(
        &self,
        label: Label,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Option<Vertex>> {
        if !label.has_property(property) {
            return Err(FraudGraphError::Query(format!(
                "{} has no property `{}`",
                label, property
            )));
        }

        let graph = self.graph.read().await;
        if property == label.key_property() {
            let key = value.as_str().ok_or_else(|| {
                FraudGraphError::Query(format!("{} lookups take a string, got {}", property, value))
            })?;
            return Ok(graph.vertices.get(&VertexKey::new(label, key)).cloned());
        }

        let mut matches = graph
            .with_label(label)
            .map(|(_, vertex)| vertex)
            .filter(|v| v.property(property).map_or(false, |stored| same_value(&stored, value)));
        let first = matches.next().cloned();
        if matches.next().is_some() {
            return Err(FraudGraphError::Query(format!(
                "{}.{} matches more than one vertex",
                label, property
            )));
        }
        Ok(first)
    }

    async fn neighbors(
        &self,
        vertex: &VertexKey,
        relation: Relation,
        direction: Direction,
    ) -> Result<Vec<Vertex>> {
        let graph = self.graph.read().await;
        let found = graph
            .adjacent(vertex, relation, direction)
            .into_iter()
            .flatten()
            .filter_map(|key| graph.vertices.get(key).cloned())
            .collect();
        Ok(by_natural_key(found))
    }

    async fn vertices_with_degree_at_least(
        &self,
        label: Label,
        relation: Relation,
        direction: Direction,
        threshold: usize,
    ) -> Result<Vec<Vertex>> {
        let graph = self.graph.read().await;
        let found = graph
            .with_label(label)
            .filter(|(key, _)| threshold == 0 || graph.degree(key, relation, direction) >= threshold)
            .map(|(_, vertex)| vertex.clone())
            .collect();
        Ok(by_natural_key(found))
    }

    async fn drop_all(&self) -> Result<()> {
        let mut graph = self.graph.write().await;
        log::warn!(
            "Dropped in-memory graph: {} vertices, {} edges deleted",
            graph.vertices.len(),
            graph.edge_count(None)
        );
        *graph = Graph::default();
        Ok(())
    }

    async fn count_vertices(&self, label: Option<Label>) -> Result<u64> {
        let graph = self.graph.read().await;
        let count = match label {
            Some(label) => graph.with_label(label).count(),
            None => graph.vertices.len(),
        };
        Ok(count as u64)
    }

    async fn count_edges(&self, relation: Option<Relation>) -> Result<u64> {
        let graph = self.graph.read().await;
        Ok(graph.edge_count(relation) as u64)
    }
}
