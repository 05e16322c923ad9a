use clap::Parser;
use fraudgraph::Config;
use fraudgraph::mutation::{compare_templates, OpenAiEmbedder, MUTATION_THRESHOLD, SCAM_TEMPLATES};
use std::path::PathBuf;
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "mutations")]
#[command(about = "Embed known scam templates and report pairs that look like rewrites of each other")]
struct Args {
    /// Write the pair scores as JSON to this file
    #[arg(short, long, default_value = "data/scam_similarities.json")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let classifier_config = config
        .classifier
        .as_ref()
        .context("mutation tracking needs a [classifier] section for the embeddings endpoint")?;
    let embedder = OpenAiEmbedder::from_config(classifier_config)?;

    log::info!("Embedding {} scam templates with {}", SCAM_TEMPLATES.len(), classifier_config.embedding_model);
    let pairs = compare_templates(&embedder, SCAM_TEMPLATES).await?;

    println!("\n=== Scam Template Similarity ===\n");
    for pair in &pairs {
        let marker = if pair.mutation { "  *** MUTATION ***" } else { "" };
        println!("  {} <-> {}: {:.3}{}", pair.template_a, pair.template_b, pair.similarity, marker);
    }
    println!(
        "\n{} of {} pairs above {}",
        pairs.iter().filter(|p| p.mutation).count(),
        pairs.len(),
        MUTATION_THRESHOLD
    );

    if let Some(parent) = args.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.output, serde_json::to_string_pretty(&pairs)?)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    println!("Results saved to {}", args.output.display());

    Ok(())
}
