use clap::Parser;
use fraudgraph::Config;
use fraudgraph::db::{Db, migrate};
use fraudgraph::graph::{GraphStore, SqliteGraphStore};
use fraudgraph::ingest::{EventChannel, IngestPipeline, PartitionSummary, SqliteEventLog};
use std::sync::Arc;
use tokio::sync::watch;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "consume")]
#[command(about = "Consume classification events into the fraud graph")]
struct Args {
    /// Drain what is pending on every partition and exit
    #[arg(long)]
    once: bool,
}

fn print_summaries(summaries: &[PartitionSummary]) {
    println!("{:<10} {:>10} {:>8} {:>8} {:>12}", "Partition", "Committed", "Dropped", "Retries", "Checkpoint");
    println!("{:-<52}", "");
    for summary in summaries {
        let checkpoint = summary
            .checkpoint
            .map(|seq| seq.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:>10} {:>8} {:>8} {:>12}",
            summary.partition, summary.committed, summary.dropped, summary.retries, checkpoint
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());
    log::info!(
        "Consumer group '{}' over {} partitions",
        config.ingest.consumer_group,
        config.ingest.partitions
    );

    let db = Db::from_config(&config);
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| {
        migrate::run_migrations(conn, &migrations_dir)
    }).await?;

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db.clone()));
    let channel: Arc<dyn EventChannel> = Arc::new(SqliteEventLog::new(
        db,
        config.ingest.partitions,
        config.poll_interval(),
    ));
    let pipeline = IngestPipeline::from_config(&config, store, channel);

    if args.once {
        let summaries = pipeline.drain().await?;
        print_summaries(&summaries);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested, finishing in-flight messages");
            let _ = shutdown_tx.send(true);
        }
    });

    log::info!("Listening for events (Ctrl+C to stop)");
    let summaries = Arc::new(pipeline).run(shutdown_rx).await?;
    print_summaries(&summaries);

    Ok(())
}
