//! # Pijaca CLI Application
//!
//! Command-line access to the marketplace search core:
//!
//! - `search`: parse a query and run hybrid retrieval over the catalog
//! - `refresh`: rebuild enriched descriptions and embeddings
//!
//! Both commands read the OpenAI key from the `OPENAI_API_KEY` environment
//! variable and operate on a local LibSQL database file.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pijaca_search::config::SearchConfig;
use pijaca_search::enrich::RefreshMode;
use pijaca_search::index::Database;
use pijaca_search::provider::{
    OpenAiChatModel, OpenAiEmbedder, RateLimitedChatModel, RateLimitedEmbedder,
};
use pijaca_search::retriever::Filters;
use pijaca_search::search::SearchSystem;

#[derive(Parser)]
#[command(author, version, about = "Hybrid product search for a grocery marketplace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the product catalog
    Search(SearchArgs),

    /// Refresh enriched descriptions and embeddings
    Refresh(RefreshArgs),
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Search query
    #[arg(required = true)]
    query: String,

    /// Number of results per query item
    #[arg(short, long)]
    k: Option<usize>,

    /// Restrict to these merchant ids (repeatable)
    #[arg(short, long)]
    merchant: Vec<i64>,

    /// Only return products with an active discount
    #[arg(short = 'd', long)]
    discounted: bool,

    /// Maximum effective price in KM
    #[arg(short = 'p', long)]
    max_price: Option<f64>,

    /// Output format (text|json)
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Database path
    #[arg(long, default_value = "pijaca.db")]
    database: PathBuf,
}

#[derive(Args, Debug)]
struct RefreshArgs {
    /// Re-embed every product, ignoring stored fingerprints
    #[arg(short, long)]
    full: bool,

    /// Refresh only these product ids (repeatable)
    #[arg(short, long)]
    id: Vec<i64>,

    /// Database path
    #[arg(long, default_value = "pijaca.db")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Search(args)) => {
            search_command(args).await?;
        }
        Some(Commands::Refresh(args)) => {
            refresh_command(args).await?;
        }
        None => {
            let _ = Cli::parse_from(["--help"]);
        }
    }

    Ok(())
}

type OpenAiSystem = SearchSystem<
    RateLimitedEmbedder<OpenAiEmbedder>,
    RateLimitedChatModel<OpenAiChatModel>,
>;

async fn build_system(database: &PathBuf) -> anyhow::Result<OpenAiSystem> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable must be set"))?;
    let db = Database::new_from_path(&database.to_string_lossy()).await?;
    Ok(SearchSystem::new_openai(db, api_key, SearchConfig::default()))
}

async fn search_command(args: SearchArgs) -> anyhow::Result<()> {
    let system = build_system(&args.database).await?;

    let filters = Filters {
        merchant_ids: args.merchant,
        only_discounted: args.discounted,
        max_price: args.max_price,
    };

    let response = system.search(&args.query, args.k, filters).await?;

    match args.format.as_str() {
        "json" => {
            let now = chrono::Utc::now().timestamp();
            let json = serde_json::json!({
                "query": args.query,
                "items": response.items,
                "degraded": response.metadata.degraded,
                "partial": response.metadata.partial,
                "reason": response.metadata.reason,
                "elapsed_ms": response.metadata.elapsed_ms,
                "results": response.flat_results.iter().map(|hit| {
                    serde_json::json!({
                        "product_id": hit.record.product.id,
                        "title": hit.record.product.title,
                        "merchant": hit.record.merchant_name,
                        "price": hit.record.product.current_price(now),
                        "combined_score": hit.combined_score,
                        "vector_score": hit.vector_score,
                        "text_score": hit.text_score,
                        "matched_item": hit.matched_item_index,
                    })
                }).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            if response.metadata.degraded {
                println!("(embedding provider unavailable, text-only results)");
            }
            if response.metadata.partial {
                println!("(deadline hit, results are partial)");
            }

            let now = chrono::Utc::now().timestamp();
            println!("Found {} results", response.flat_results.len());
            for (i, hit) in response.flat_results.iter().enumerate() {
                let item = &response.items[hit.matched_item_index];
                println!(
                    "{}. {} - {:.2} KM ({})",
                    i + 1,
                    hit.record.product.title,
                    hit.record.product.current_price(now),
                    hit.record.merchant_name
                );
                println!(
                    "   score {:.3} (vector {:.3}, text {:.3}), matched \"{}\"",
                    hit.combined_score, hit.vector_score, hit.text_score, item.query
                );
            }
        }
    }

    Ok(())
}

async fn refresh_command(args: RefreshArgs) -> anyhow::Result<()> {
    let system = build_system(&args.database).await?;

    let mode = if args.full {
        RefreshMode::Full
    } else {
        RefreshMode::Incremental
    };
    let ids = (!args.id.is_empty()).then_some(args.id.as_slice());

    println!("Refreshing embeddings ({:?})...", mode);
    let start = std::time::Instant::now();

    let report = system.refresh_embeddings(mode, ids).await?;

    println!(
        "Refreshed {} products in {:.2?}: {} embedded, {} unchanged, {} failed",
        report.processed,
        start.elapsed(),
        report.succeeded,
        report.skipped,
        report.failed
    );
    for (product_id, error) in &report.failures {
        println!("  product {}: {}", product_id, error);
    }

    Ok(())
}
