use clap::{Parser, Subcommand};
use memdex_embed::EmbeddingGateway;
use memdex_retriever::{
    FsDocumentStore, IndexManager, IndexStatus, MemdexConfig, ScoredResult, render_context,
    storage::StoredChunk,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A CLI tool to query and maintain per-agent memory indexes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace directory holding one subdirectory per agent
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Retrieve the memory chunks most relevant to a message
    Query {
        /// Agent id
        agent: String,
        /// Message to match against the agent's memory
        text: String,
        /// Maximum number of results (configured default when omitted)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Rebuild an agent's index from its memory document
    Rebuild {
        /// Agent id
        agent: String,
    },
    /// Show the state of an agent's index
    Status {
        /// Agent id
        agent: String,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List the chunks of an agent's index
    Chunks {
        /// Agent id
        agent: String,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Import an agent's legacy flat-file index into the SQLite store
    Migrate {
        /// Agent id
        agent: String,
    },
    /// Delete an agent's index
    Forget {
        /// Agent id
        agent: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct QueryOutput {
    agent_id: String,
    query: String,
    results: Vec<ScoredResult>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = MemdexConfig::load(args.config.as_deref())?;
    let gateway = EmbeddingGateway::from_config(&config.embedding)?;
    let documents = Arc::new(FsDocumentStore::new(&args.workspace));
    let retrieval_enabled = config.retrieval.enabled;
    let manager = IndexManager::new(&args.workspace, config, documents, gateway)?;

    let outcome = execute(&manager, args.command, retrieval_enabled).await;
    manager.close().await;
    outcome
}

async fn execute(
    manager: &IndexManager,
    command: Commands,
    retrieval_enabled: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Query {
            agent,
            text,
            top_k,
            format,
        } => {
            if !retrieval_enabled {
                tracing::warn!("Retrieval is disabled in the configuration; querying anyway");
            }
            let top_k = top_k.unwrap_or_else(|| manager.default_top_k());
            let results = manager.query(&agent, &text, top_k).await?;

            match format {
                OutputFormat::Json => {
                    let output = QueryOutput {
                        agent_id: agent,
                        query: text,
                        results,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} relevant chunks:", results.len());
                    for result in &results {
                        println!(
                            "  Score: {:.3} | Chunk: {} | Preview: {}",
                            result.score,
                            result.chunk_id,
                            preview(&result.chunk_text)
                        );
                    }
                }
                OutputFormat::Full => {
                    let context = render_context(&results);
                    if context.is_empty() {
                        println!("No relevant memory found");
                    } else {
                        println!("{context}");
                    }
                }
            }
            Ok(())
        }
        Commands::Rebuild { agent } => {
            let state = manager.rebuild(&agent).await?;
            let status = manager.status(&agent).await?;
            let chunk_count = status.metadata.map(|m| m.chunk_count).unwrap_or(0);
            println!("Index for agent {agent} is {state} ({chunk_count} chunks)");
            Ok(())
        }
        Commands::Status { agent, format } => {
            let status = manager.status(&agent).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                OutputFormat::Summary => print_status(&status, false),
                OutputFormat::Full => print_status(&status, true),
            }
            Ok(())
        }
        Commands::Chunks { agent, format } => {
            let chunks = manager.chunks(&agent).await?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&chunks)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} chunks:", chunks.len());
                    for chunk in &chunks {
                        println!(
                            "  ID: {} | Offsets: {}-{} | Preview: {}",
                            chunk.chunk_id,
                            chunk.start_offset,
                            chunk.end_offset,
                            preview(&chunk.text)
                        );
                    }
                }
                OutputFormat::Full => {
                    for chunk in &chunks {
                        print_chunk(chunk);
                    }
                }
            }
            Ok(())
        }
        Commands::Migrate { agent } => {
            match manager.migrate_legacy(&agent).await? {
                Some(count) => println!("Imported {count} legacy chunks for agent {agent}"),
                None => println!("No legacy index to import for agent {agent}"),
            }
            Ok(())
        }
        Commands::Forget { agent } => {
            manager.remove_agent(&agent).await?;
            println!("Removed index for agent {agent}");
            Ok(())
        }
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 60 {
        format!("{}...", flat.chars().take(60).collect::<String>())
    } else {
        flat
    }
}

fn print_chunk(chunk: &StoredChunk) {
    println!("Chunk ID: {}", chunk.chunk_id);
    println!("Source: {}", chunk.source);
    println!("Offsets: {}-{}", chunk.start_offset, chunk.end_offset);
    println!("Content:\n{}", chunk.text);
    println!("---");
}

fn print_status(status: &IndexStatus, full: bool) {
    println!("Memory Index Status");
    println!("===================");
    println!("Agent: {}", status.agent_id);
    println!("State: {}", status.state);
    println!("Engine: {}", status.engine);
    if let Some(reason) = &status.stale_reason {
        println!("Stale because: {reason}");
    }
    println!(
        "Legacy index present: {}",
        if status.legacy_index_present { "Yes" } else { "No" }
    );

    match &status.metadata {
        Some(meta) => {
            println!("Chunks: {}", meta.chunk_count);
            println!("Built at: {}", meta.built_at.to_rfc3339());
            if full {
                println!("Content digest: {}", meta.content_digest);
                println!("Schema version: {}", meta.schema_version);
                println!("Chunk size: {}", meta.chunk_size);
                println!("Chunk overlap: {}", meta.chunk_overlap);
                println!(
                    "Embedding: {}:{}",
                    meta.embedding_provider, meta.embedding_model
                );
            }
        }
        None => println!("No index built"),
    }
}
