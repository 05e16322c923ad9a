use clap::Parser;
use fraudgraph::Config;
use fraudgraph::db::{Db, migrate};
use fraudgraph::graph::{Category, RiskLevel};
use fraudgraph::ingest::{publish_event, ClassificationEvent, SqliteEventLog};
use std::path::PathBuf;
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "publish")]
#[command(about = "Publish a classification event onto the event log")]
struct Args {
    /// Event as inline JSON
    payload: Option<String>,

    /// Read the event JSON from a file instead
    #[arg(short, long, conflicts_with = "payload")]
    file: Option<PathBuf>,
}

fn sample_event() -> ClassificationEvent {
    ClassificationEvent {
        event_id: None,
        category: Category::FakeCashback,
        confidence: 0.97,
        risk_level: RiskLevel::High,
        source: "test".to_string(),
        sender: "unknown".to_string(),
        message: Some("Google Pay se Rs.1500 cashback mila hai. Approve karein.".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    let event = match (&args.payload, &args.file) {
        (Some(payload), _) => ClassificationEvent::parse(payload)?,
        (None, Some(path)) => {
            let payload = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ClassificationEvent::parse(&payload)?
        }
        (None, None) => {
            log::info!("No event given, publishing the sample cashback event");
            sample_event()
        }
    };

    let config = Config::load()?;
    let db = Db::from_config(&config);
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| {
        migrate::run_migrations(conn, &migrations_dir)
    }).await?;

    let channel = SqliteEventLog::new(db, config.ingest.partitions, config.poll_interval());
    let receipt = publish_event(&channel, event).await?;

    println!("Event ID:  {}", receipt.event_id);
    println!("Partition: {}", receipt.partition);
    println!("Sequence:  {}", receipt.sequence_number);

    Ok(())
}
