pub mod config;
pub mod error;
pub mod db;
pub mod graph;
pub mod ingest;
pub mod investigate;
pub mod seed;
pub mod classifier;
pub mod mutation;
pub mod http;

pub use config::Config;
pub use error::{FraudGraphError, Result};
pub use graph::{GraphStore, MemoryGraphStore, SqliteGraphStore};
pub use ingest::{EventChannel, IngestPipeline, SqliteEventLog};
pub use investigate::InvestigationService;
pub use seed::BulkLoader;
