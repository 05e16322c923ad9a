use fraudgraph::Config;
use fraudgraph::classifier::{Classifier, OpenAiClassifier};
use fraudgraph::db::{Db, migrate};
use fraudgraph::graph::{GraphStore, SqliteGraphStore};
use fraudgraph::http::{AppState, HttpApiServer};
use fraudgraph::ingest::{EventChannel, SqliteEventLog};
use std::sync::Arc;
use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve-http" => run_http_server().await?,
        "verify" => run_schema_verification().await?,
        other => {
            anyhow::bail!("Unknown command '{}'. Use 'verify' or 'serve-http'.", other);
        }
    }

    Ok(())
}

/// Open the database and bring the schema up to date
async fn open_database(config: &Config) -> Result<Db> {
    let db = Db::from_config(config);
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| {
        migrate::run_migrations(conn, &migrations_dir)
    }).await?;
    log::info!("Database initialized: {}", db.path().display());
    Ok(db)
}

async fn run_http_server() -> Result<()> {
    log::info!("Starting FraudGraph HTTP API v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let db = open_database(&config).await?;

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db.clone()));
    let channel: Arc<dyn EventChannel> = Arc::new(SqliteEventLog::new(
        db,
        config.ingest.partitions,
        config.poll_interval(),
    ));

    let classifier: Option<Arc<dyn Classifier>> = match &config.classifier {
        Some(classifier_config) => {
            log::info!("Classifier model: {}", classifier_config.model);
            Some(Arc::new(OpenAiClassifier::from_config(classifier_config)?))
        }
        None => {
            log::warn!("No [classifier] section; /api/classify will answer 503");
            None
        }
    };

    let state = AppState::new(&config, store, channel, classifier);
    let server = HttpApiServer::new(state, config.http_server.allowed_origins.clone());
    server.run(config.http_server.port).await?;

    Ok(())
}

async fn run_schema_verification() -> Result<()> {
    log::info!("Starting FraudGraph v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Environment: {}", config.deployment.environment);
    log::info!("Ring threshold: {}", config.graph.ring_threshold);

    let db = open_database(&config).await?;
    verify_database_schema(&db).await?;

    Ok(())
}

/// Verify that all expected database objects exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    use fraudgraph::error::FraudGraphError;

    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_tables = ["checkpoints", "edges", "event_log", "schema_migrations", "vertices"];
        let missing: Vec<_> = expected_tables
            .iter()
            .filter(|table| !tables.iter().any(|t| t == *table))
            .collect();
        for table in &missing {
            log::error!("Missing table: {}", table);
        }
        if !missing.is_empty() {
            return Err(FraudGraphError::Configuration("Not all required tables exist".to_string()));
        }

        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")?;
        let indexes: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        for index_name in ["idx_vertices_label", "idx_vertices_label_partition", "idx_edges_to_relation"] {
            if indexes.iter().any(|i| i == index_name) {
                log::debug!("✓ Index exists: {}", index_name);
            } else {
                log::warn!("Index not found: {}", index_name);
            }
        }

        let applied = migrate::get_applied_migrations(conn)?;
        if applied.len() < 2 {
            return Err(FraudGraphError::Configuration(format!("Expected at least 2 migrations, found {}", applied.len())));
        }
        log::debug!("✓ {} migrations applied", applied.len());

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(FraudGraphError::Configuration(format!("Journal mode is not WAL: {}", journal_mode)));
        }

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(FraudGraphError::Configuration("Foreign keys not enabled".to_string()));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(FraudGraphError::Configuration(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    }).await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}
