//! Fraud relationship graph: data model, store backends and traversal.
//!
//! Phones operate payment addresses (`OPERATED_BY`); classified scam reports
//! land as `FraudEvent` vertices. Every backend implements [`GraphStore`].

pub mod model;
mod memory;
mod sqlite;
mod store;
mod traversal;

pub use memory::MemoryGraphStore;
pub use model::{
    Category, Direction, FraudEvent, Label, Phone, PropertyValue, Relation, RiskLevel, UpiStatus,
    UpiVpa, Vertex, VertexKey,
};
pub use sqlite::SqliteGraphStore;
pub use store::GraphStore;
pub use traversal::{traverse_network, NetworkLink};
