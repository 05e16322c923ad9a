use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use fraudgraph::db::{migrate, Db};
use fraudgraph::graph::{Category, GraphStore, Label, RiskLevel, SqliteGraphStore, VertexKey};
use fraudgraph::ingest::{publish_event, ClassificationEvent, EventChannel, IngestPipeline, SqliteEventLog};
use fraudgraph::investigate::InvestigationService;
use fraudgraph::seed::{BulkLoader, Dataset};
use serde_json::Value;

fn migrations_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

async fn open(path: &Path) -> Db {
    let db = Db::new(path);
    let migrations = migrations_dir();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations))
        .await
        .unwrap();
    db
}

fn event(event_id: Option<&str>, category: Category, sender: &str) -> ClassificationEvent {
    ClassificationEvent {
        event_id: event_id.map(str::to_string),
        category,
        confidence: 0.91,
        risk_level: RiskLevel::High,
        source: "sms".to_string(),
        sender: sender.to_string(),
        message: Some("KYC expired, share OTP to avoid account freeze".to_string()),
    }
}

#[tokio::test]
async fn events_flow_into_graph_once() {
    let temp = tempfile::tempdir().unwrap();
    let db = open(&temp.path().join("graph.db")).await;
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db.clone()));
    let channel: Arc<dyn EventChannel> = Arc::new(SqliteEventLog::new(
        db.clone(),
        4,
        std::time::Duration::from_millis(20),
    ));

    let first = publish_event(channel.as_ref(), event(Some("evt-kyc-1"), Category::KycFreeze, "+91-9876500003"))
        .await
        .unwrap();
    // A producer retry lands the same event on the log twice
    publish_event(channel.as_ref(), event(Some("evt-kyc-1"), Category::KycFreeze, "+91-9876500003"))
        .await
        .unwrap();
    publish_event(channel.as_ref(), event(None, Category::JobScam, "+91-9876500007"))
        .await
        .unwrap();
    channel.publish("kyc_freeze", "{\"category\": \"kyc_freeze\"").await.unwrap();

    let pipeline = IngestPipeline::new(Arc::clone(&store), Arc::clone(&channel), "integration");
    let summaries = pipeline.drain().await.unwrap();
    let committed: u64 = summaries.iter().map(|s| s.committed).sum();
    let dropped: u64 = summaries.iter().map(|s| s.dropped).sum();
    assert_eq!(committed, 3);
    assert_eq!(dropped, 1);

    assert_eq!(store.count_vertices(Some(Label::FraudEvent)).await.unwrap(), 2);
    assert!(store
        .get_vertex(&VertexKey::fraud_event("evt-kyc-1"))
        .await
        .unwrap()
        .is_some());

    let checkpoint = channel
        .load_checkpoint("integration", first.partition)
        .await
        .unwrap();
    assert!(checkpoint.is_some());

    // A fresh consumer in the same group resumes after the checkpoints
    let resumed = IngestPipeline::new(Arc::clone(&store), channel, "integration");
    let summaries = resumed.drain().await.unwrap();
    assert_eq!(summaries.iter().map(|s| s.committed).sum::<u64>(), 0);
    assert_eq!(store.count_vertices(Some(Label::FraudEvent)).await.unwrap(), 2);
}

#[tokio::test]
async fn seeded_network_answers_investigations() {
    let temp = tempfile::tempdir().unwrap();
    let db = open(&temp.path().join("graph.db")).await;
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db));

    BulkLoader::new(Arc::clone(&store), 2)
        .seed_dataset(&Dataset::baseline())
        .await
        .unwrap();
    let service = InvestigationService::new(store, 2);

    let phone = service.investigate_phone("+91-9876500001").await.unwrap();
    assert!(phone.found);
    assert!(phone.is_ring);
    assert!(phone.operated_upis.len() >= 2);

    let upi = service
        .investigate_upi(&phone.operated_upis[0].vpa)
        .await
        .unwrap();
    assert!(upi.found);
    assert!(upi
        .related_phones
        .iter()
        .any(|p| p.number == "+91-9876500001"));

    let missing = service.investigate_upi("nobody@ybl").await.unwrap();
    assert!(!missing.found);

    let network = service.related_network("+91-9876500001", 2).await.unwrap();
    assert!(network.found);
    assert!(!network.links.is_empty());
}

fn write_config(dir: &Path) -> PathBuf {
    let config_path = dir.join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "[graph]\ndb_path = {:?}\nmigrations_dir = {:?}\n\n[deployment]\nenvironment = \"development\"\n",
            dir.join("graph.db").display().to_string(),
            migrations_dir().display().to_string(),
        ),
    )
    .unwrap();
    config_path
}

fn run_bin(bin: &str, config: &Path, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(bin);
    cmd.args(args)
        .env("FRAUDGRAPH_CONFIG", config)
        .env("RUST_LOG", "error")
        .env_remove("ENV");
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().unwrap()
}

#[test]
fn seed_cli_refuses_reset_in_production() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_config(temp.path());
    let seed = env!("CARGO_BIN_EXE_seed");

    let output = run_bin(seed, &config, &[], &[]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Vertices: 30"));

    let refused = run_bin(seed, &config, &["--reset", "--yes"], &[("ENV", "production")]);
    assert!(!refused.status.success());

    let output = run_bin(
        env!("CARGO_BIN_EXE_investigate"),
        &config,
        &["phone", "+91-9876500010"],
        &[],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["found"], true);
    assert_eq!(report["is_ring"], true);
}

#[test]
fn seed_cli_unattended_reset_needs_override() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_config(temp.path());
    let seed = env!("CARGO_BIN_EXE_seed");

    // stdin from Command::output is not a terminal
    let aborted = run_bin(seed, &config, &["--reset"], &[]);
    assert!(aborted.status.success());
    assert!(String::from_utf8_lossy(&aborted.stdout).contains("Aborted."));

    let reset = run_bin(seed, &config, &["--reset", "--yes"], &[]);
    assert!(reset.status.success(), "{}", String::from_utf8_lossy(&reset.stderr));
    assert!(String::from_utf8_lossy(&reset.stdout).contains("Edges:    17"));
}
