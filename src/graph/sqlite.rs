//! SQLite-backed graph store.
//!
//! Vertices live in one table keyed by `(label, natural_key)` with the typed
//! property bag stored as JSON; edges are keyed by `(from, to, relation)` so a
//! repeated add is a no-op. Every call runs in its own connection and, for
//! writes, its own IMMEDIATE transaction.

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::model::{validate_edge, Direction, Label, PropertyValue, Relation, Vertex, VertexKey};
use super::store::GraphStore;
use crate::db::Db;
use crate::error::{FraudGraphError, Result};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub struct SqliteGraphStore {
    db: Db,
}

impl SqliteGraphStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }
}

fn vertex_id(conn: &Connection, key: &VertexKey) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT vertex_id FROM vertices WHERE label = ?1 AND natural_key = ?2",
            params![key.label.as_str(), key.key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn to_sql_value(value: &PropertyValue) -> Result<SqlValue> {
    match value {
        PropertyValue::String(s) => Ok(SqlValue::Text(s.clone())),
        PropertyValue::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        PropertyValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(FraudGraphError::Query(format!("unsupported number {}", n)))
            }
        }
        other => Err(FraudGraphError::Query(format!(
            "property lookups take a scalar value, got {}",
            other
        ))),
    }
}

/// Run a query whose rows are `(label, properties_json)` and decode them
fn query_vertices(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Vertex>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    rows.iter()
        .map(|(label, json)| Vertex::decode(label.parse()?, json))
        .collect()
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_vertex(&self, vertex: Vertex) -> Result<Vertex> {
        vertex.validate()?;
        let label = vertex.label();
        let key = vertex.natural_key().to_string();
        let partition = vertex.partition_key().to_string();
        let properties = vertex.properties()?.to_string();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    &format!(
                        "INSERT INTO vertices (label, natural_key, partition_key, properties_json) \
                         VALUES (?1, ?2, ?3, ?4) \
                         ON CONFLICT(label, natural_key) DO UPDATE SET \
                             partition_key = excluded.partition_key, \
                             properties_json = excluded.properties_json, \
                             updated_at = {}",
                        NOW
                    ),
                    params![label.as_str(), key, partition, properties],
                )?;
                let stored: String = tx.query_row(
                    "SELECT properties_json FROM vertices WHERE label = ?1 AND natural_key = ?2",
                    params![label.as_str(), key],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Vertex::decode(label, &stored)
            })
            .await
    }

    async fn add_edge(&self, from: &VertexKey, to: &VertexKey, relation: Relation) -> Result<bool> {
        validate_edge(from, to, relation)?;
        let from = from.clone();
        let to = to.clone();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let from_id = vertex_id(&tx, &from)?
                    .ok_or_else(|| FraudGraphError::Query(format!("edge endpoint {} does not exist", from)))?;
                let to_id = vertex_id(&tx, &to)?
                    .ok_or_else(|| FraudGraphError::Query(format!("edge endpoint {} does not exist", to)))?;
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO edges (from_vertex, to_vertex, relation) VALUES (?1, ?2, ?3)",
                    params![from_id, to_id, relation.as_str()],
                )?;
                tx.commit()?;
                Ok(inserted == 1)
            })
            .await
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

        if property == label.key_property() {
            let key = value
                .as_str()
                .ok_or_else(|| {
                    FraudGraphError::Query(format!("{} lookups take a string, got {}", property, value))
                })?
                .to_string();
            return self
                .db
                .with_connection(move |conn| {
                    let stored: Option<String> = conn
                        .query_row(
                            "SELECT properties_json FROM vertices WHERE label = ?1 AND natural_key = ?2",
                            params![label.as_str(), key],
                            |row| row.get(0),
                        )
                        .optional()?;
                    stored.map(|json| Vertex::decode(label, &json)).transpose()
                })
                .await;
        }

        let path = format!("$.{}", property);
        let bound = to_sql_value(value)?;
        let property = property.to_string();
        self.db
            .with_connection(move |conn| {
                let mut matches = query_vertices(
                    conn,
                    "SELECT label, properties_json FROM vertices \
                     WHERE label = ?1 AND json_extract(properties_json, ?2) = ?3 \
                     ORDER BY natural_key LIMIT 2",
                    &[&label.as_str(), &path, &bound],
                )?;
                if matches.len() > 1 {
                    return Err(FraudGraphError::Query(format!(
                        "{}.{} matches more than one vertex",
                        label, property
                    )));
                }
                Ok(matches.pop())
            })
            .await
    }

    async fn neighbors(
        &self,
        vertex: &VertexKey,
        relation: Relation,
        direction: Direction,
    ) -> Result<Vec<Vertex>> {
        let (near, far) = match direction {
            Direction::Out => ("from_vertex", "to_vertex"),
            Direction::In => ("to_vertex", "from_vertex"),
        };
        let sql = format!(
            "SELECT t.label, t.properties_json \
             FROM vertices s \
             JOIN edges e ON e.{near} = s.vertex_id AND e.relation = ?3 \
             JOIN vertices t ON t.vertex_id = e.{far} \
             WHERE s.label = ?1 AND s.natural_key = ?2 \
             ORDER BY t.natural_key",
        );
        let vertex = vertex.clone();

        self.db
            .with_connection(move |conn| {
                query_vertices(
                    conn,
                    &sql,
                    &[&vertex.label.as_str(), &vertex.key, &relation.as_str()],
                )
            })
            .await
    }

    async fn vertices_with_degree_at_least(
        &self,
        label: Label,
        relation: Relation,
        direction: Direction,
        threshold: usize,
    ) -> Result<Vec<Vertex>> {
        if threshold == 0 {
            return self
                .db
                .with_connection(move |conn| {
                    query_vertices(
                        conn,
                        "SELECT label, properties_json FROM vertices WHERE label = ?1 ORDER BY natural_key",
                        &[&label.as_str()],
                    )
                })
                .await;
        }

        let near = match direction {
            Direction::Out => "from_vertex",
            Direction::In => "to_vertex",
        };
        let sql = format!(
            "SELECT v.label, v.properties_json \
             FROM vertices v \
             JOIN edges e ON e.{near} = v.vertex_id AND e.relation = ?2 \
             WHERE v.label = ?1 \
             GROUP BY v.vertex_id \
             HAVING COUNT(*) >= ?3 \
             ORDER BY v.natural_key",
        );
        let threshold = i64::try_from(threshold)
            .map_err(|_| FraudGraphError::Query(format!("degree threshold {} too large", threshold)))?;

        self.db
            .with_connection(move |conn| {
                query_vertices(conn, &sql, &[&label.as_str(), &relation.as_str(), &threshold])
            })
            .await
    }

    async fn drop_all(&self) -> Result<()> {
        self.db
            .with_connection(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let edges = tx.execute("DELETE FROM edges", [])?;
                let vertices = tx.execute("DELETE FROM vertices", [])?;
                tx.commit()?;
                log::warn!("Dropped graph: {} vertices, {} edges deleted", vertices, edges);
                Ok(())
            })
            .await
    }

    async fn count_vertices(&self, label: Option<Label>) -> Result<u64> {
        self.db
            .with_connection(move |conn| {
                let count: i64 = match label {
                    Some(label) => conn.query_row(
                        "SELECT COUNT(*) FROM vertices WHERE label = ?1",
                        params![label.as_str()],
                        |row| row.get(0),
                    )?,
                    None => conn.query_row("SELECT COUNT(*) FROM vertices", [], |row| row.get(0))?,
                };
                Ok(count as u64)
            })
            .await
    }

    async fn count_edges(&self, relation: Option<Relation>) -> Result<u64> {
        self.db
            .with_connection(move |conn| {
                let count: i64 = match relation {
                    Some(relation) => conn.query_row(
                        "SELECT COUNT(*) FROM edges WHERE relation = ?1",
                        params![relation.as_str()],
                        |row| row.get(0),
                    )?,
                    None => conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?,
                };
                Ok(count as u64)
            })
            .await
    }
}
