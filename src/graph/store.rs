//! The graph store seam: every backend implements [`GraphStore`].

use async_trait::async_trait;

use super::model::{Direction, Label, PropertyValue, Relation, Vertex, VertexKey};
use crate::error::Result;

/// Property graph with natural-key identity.
///
/// "No match" is always `Ok(None)` / an empty `Vec`, never an error.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the vertex if absent, else replace its whole property set.
    /// Returns the vertex as stored after the write.
    async fn upsert_vertex(&self, vertex: Vertex) -> Result<Vertex>;

    /// Ensure the (from, to, relation) edge exists. Returns `true` when a new
    /// edge was created, `false` when it was already present.
    async fn add_edge(&self, from: &VertexKey, to: &VertexKey, relation: Relation) -> Result<bool>;

    /// Exact-match lookup on one property of a label.
    async fn find_vertex(
        &self,
        label: Label,
        property: &str,
        value: &PropertyValue,
    ) -> Result<Option<Vertex>>;

    /// One hop along `relation`, ordered by natural key.
    async fn neighbors(
        &self,
        vertex: &VertexKey,
        relation: Relation,
        direction: Direction,
    ) -> Result<Vec<Vertex>>;

    /// Vertices of `label` whose degree along `relation` is at least `threshold`,
    /// ordered by natural key.
    async fn vertices_with_degree_at_least(
        &self,
        label: Label,
        relation: Relation,
        direction: Direction,
        threshold: usize,
    ) -> Result<Vec<Vertex>>;

    /// Irreversibly delete every vertex and edge.
    async fn drop_all(&self) -> Result<()>;

    async fn count_vertices(&self, label: Option<Label>) -> Result<u64>;

    async fn count_edges(&self, relation: Option<Relation>) -> Result<u64>;

    async fn get_vertex(&self, key: &VertexKey) -> Result<Option<Vertex>> {
        let value = PropertyValue::String(key.key.clone());
        self.find_vertex(key.label, key.label.key_property(), &value).await
    }

    async fn out_neighbors(&self, vertex: &VertexKey, relation: Relation) -> Result<Vec<Vertex>> {
        self.neighbors(vertex, relation, Direction::Out).await
    }

    async fn in_neighbors(&self, vertex: &VertexKey, relation: Relation) -> Result<Vec<Vertex>> {
        self.neighbors(vertex, relation, Direction::In).await
    }
}
