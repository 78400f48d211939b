use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use augmenter::search::{EvidenceDocument, LocalSearch};
use augmenter::{
    AugmenterConfig, Consolidation, Credentials, EvidenceQuery, KnowledgeConsolidator,
    LlmAugmenter,
};

#[derive(Parser)]
#[command(name = "augmenter")]
#[command(about = "Evidence-grounded LLM responses with knowledge consolidation", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve and consolidate evidence for a query
    Consolidate {
        /// The user query
        query: String,

        /// Earlier dialog turns, oldest first
        #[arg(short = 'H', long = "history")]
        history: Vec<String>,

        /// Print the consolidation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate an evidence-grounded response
    Respond {
        /// The user query
        query: String,

        /// Earlier dialog turns, oldest first
        #[arg(short = 'H', long = "history")]
        history: Vec<String>,
    },

    /// Add text files to the local search index
    Index {
        /// Files to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Search the local index
    Search {
        /// Search query
        query: String,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "augmenter=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AugmenterConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Consolidate {
            query,
            history,
            json,
        } => {
            let adapters = config.adapters(&Credentials::from_env())?;
            let consolidator = KnowledgeConsolidator::new(adapters, config.pipeline.clone())?;
            let query = EvidenceQuery::new(query).with_history(history);

            let cancel = cancel_on_ctrl_c();
            let consolidation = consolidator.consolidate_with_cancel(&query, &cancel).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&consolidation)?);
            } else {
                print_consolidation(&consolidation);
            }
        }

        Commands::Respond { query, history } => {
            let adapters = config.adapters(&Credentials::from_env())?;
            let augmenter = LlmAugmenter::new(adapters, &config)?;
            let query = EvidenceQuery::new(query).with_history(history);

            let cancel = cancel_on_ctrl_c();
            let response = augmenter.respond(&query, &cancel).await?;

            println!("{}", response.response);
            println!();
            println!(
                "Score: {:.2} ({}) after {} attempt(s)",
                response.score,
                if response.accepted { "accepted" } else { "below threshold" },
                response.attempts.len()
            );
            if !response.evidence.is_empty() {
                println!("Sources:");
                let mut seen = std::collections::HashSet::new();
                for item in &response.evidence {
                    if seen.insert(item.source.as_str()) {
                        println!("  - {}", item.source);
                    }
                }
            }
            for issue in &response.issues {
                println!("  ! {}", issue);
            }
        }

        Commands::Index { paths } => {
            let index_path = config.search.index_path();
            let indexed = index_files(&index_path, &paths)?;
            println!("Indexed {} file(s) into {:?}", indexed, index_path);
        }

        Commands::Search { query, limit } => {
            let index_path = config.search.index_path();
            if !index_path.exists() {
                println!("No search index found at {:?}. Run 'augmenter index <paths>' first.", index_path);
                return Ok(());
            }

            let index = LocalSearch::open_reader_only(&index_path)?;
            let hits = index.search(&query, limit)?;
            if hits.is_empty() {
                println!("No results found for: {}", query);
            } else {
                println!("Found {} results:", hits.len());
                println!("{}", "=".repeat(60));
                for (i, hit) in hits.iter().enumerate() {
                    let preview: String = hit.content.chars().take(200).collect();
                    println!("{}. {} (score: {:.3})", i + 1, hit.title, hit.score);
                    println!("   {}", hit.source);
                    println!("   {}", preview.replace('\n', " "));
                    println!();
                }
            }
        }

        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn index_files(index_path: &Path, paths: &[PathBuf]) -> Result<usize> {
    std::fs::create_dir_all(index_path)?;
    let mut index = LocalSearch::open(index_path)?;

    let mut indexed = 0;
    for path in paths {
        match EvidenceDocument::from_file(path) {
            Ok(document) => {
                index.index_document(&document)?;
                indexed += 1;
            }
            Err(e) => warn!("Skipping {:?}: {}", path, e),
        }
    }

    index.commit()?;
    info!(indexed, total = index.count(), "Index updated");
    Ok(indexed)
}

fn print_consolidation(consolidation: &Consolidation) {
    let stats = &consolidation.stats;
    println!(
        "{} queries, {} evidence units, {} nodes, {} edges, {} pruned",
        stats.search_queries, stats.raw_evidence, stats.nodes, stats.edges, stats.pruned
    );

    if consolidation.is_empty() {
        println!("No evidence chains found.");
    } else {
        println!("{}", "=".repeat(60));
        for (i, chain) in consolidation.chains.iter().enumerate() {
            println!("{}. {} (score: {:.2})", i + 1, chain.entities.join(" -> "), chain.score);
            for item in &chain.evidence {
                println!("   - {}", item.text);
                println!("     {}", item.source);
            }
        }
    }

    for issue in &consolidation.issues {
        println!("  ! {}", issue);
    }
}
