use clap::Parser;
use fraudgraph::Config;
use fraudgraph::db::{Db, migrate};
use fraudgraph::graph::{GraphStore, SqliteGraphStore};
use fraudgraph::seed::{BulkLoader, Confirmation, Dataset, ResetGuard};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "seed")]
#[command(about = "Load a known scam network into the fraud graph")]
struct Args {
    /// Wipe all graph data before loading (refused in production)
    #[arg(long)]
    reset: bool,

    /// Approve the reset without a prompt when stdin is not a terminal
    #[arg(short, long)]
    yes: bool,

    /// JSON dataset to load instead of the built-in baseline
    #[arg(short, long)]
    dataset: Option<PathBuf>,
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
    log::info!("Environment: {}", config.deployment.environment);

    let db = Db::from_config(&config);
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| {
        migrate::run_migrations(conn, &migrations_dir)
    }).await?;

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db));
    let loader = BulkLoader::from_config(&config, store);

    if args.reset {
        let guard = ResetGuard::from_config(&config);
        let stdin = std::io::stdin();
        let authorization = if stdin.is_terminal() {
            let mut input = stdin.lock();
            let mut prompt = std::io::stderr();
            guard.authorize(Confirmation::Attended {
                input: &mut input,
                prompt: &mut prompt,
            })?
        } else {
            guard.authorize(Confirmation::Unattended { assume_yes: args.yes })?
        };

        match authorization {
            Some(authorization) => loader.reset(authorization).await?,
            None => {
                println!("Aborted.");
                return Ok(());
            }
        }
    }

    let dataset = match &args.dataset {
        Some(path) => {
            log::info!("Loading dataset from {}", path.display());
            Dataset::from_path(path)?
        }
        None => Dataset::baseline(),
    };

    let report = loader.seed_dataset(&dataset).await?;
    println!("\n=== Seed Complete ===\n");
    println!("{:<10} {:>8} {:>8} {:>8}", "Kind", "Created", "Existing", "Failed");
    println!("{:-<38}", "");
    for (kind, counts) in [("Vertices", &report.vertices), ("Edges", &report.edges)] {
        println!("{:<10} {:>8} {:>8} {:>8}", kind, counts.created, counts.existing, counts.failed);
    }
    println!();

    let statistics = loader.report_statistics().await?;
    print!("{}", statistics);

    Ok(())
}
