use clap::{Parser, Subcommand};
use fraudgraph::Config;
use fraudgraph::db::Db;
use fraudgraph::graph::{GraphStore, SqliteGraphStore};
use fraudgraph::investigate::InvestigationService;
use std::sync::Arc;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "investigate")]
#[command(about = "Query the fraud graph for payment addresses, phones and scam rings")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up a payment address and the phones operating it
    Upi { vpa: String },
    /// Look up a phone, the addresses it operates and whether it is a ring
    Phone { number: String },
    /// List phones operating at least the threshold number of addresses
    Rings {
        #[arg(short, long)]
        threshold: Option<usize>,
    },
    /// Walk phone/address links outward from a phone or payment address
    Network {
        identifier: String,
        #[arg(short, long, default_value_t = 2)]
        depth: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "warn")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;
    let db = Db::from_config(&config);
    if !db.path().exists() {
        anyhow::bail!("Database {} does not exist. Run `seed` first.", db.path().display());
    }

    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::new(db));
    let service = InvestigationService::from_config(&config, store);

    let output = match args.command {
        Command::Upi { vpa } => serde_json::to_string_pretty(&service.investigate_upi(&vpa).await?)?,
        Command::Phone { number } => {
            serde_json::to_string_pretty(&service.investigate_phone(&number).await?)?
        }
        Command::Rings { threshold } => {
            serde_json::to_string_pretty(&service.find_scam_rings(threshold).await?)?
        }
        Command::Network { identifier, depth } => {
            serde_json::to_string_pretty(&service.related_network(&identifier, depth).await?)?
        }
    };
    println!("{}", output);

    Ok(())
}
