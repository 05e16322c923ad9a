use clap::Parser;
use fraudgraph::Config;
use fraudgraph::db::Db;
use fraudgraph::graph::{GraphStore, SqliteGraphStore};
use fraudgraph::seed::BulkLoader;
use std::sync::Arc;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "stats")]
#[command(about = "Print vertex and edge counts and detected scam rings")]
struct Args {
    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let db = Db::from_config(&config);

    if !db.path().exists() {
        anyhow::bail!(
            "Database {} does not exist. Run `seed` or `fraudgraph verify` first.",
            db.path().display()
        );
    }

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db));
    let statistics = BulkLoader::from_config(&config, store).report_statistics().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statistics)?);
    } else {
        println!("\n=== FraudGraph Statistics ===\n");
        print!("{}", statistics);
        println!("{:-<60}", "");
    }

    Ok(())
}
