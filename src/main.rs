//! # profile-rag CLI
//!
//! Builds a retrieval index over a person's professional profile and
//! serves grounded answers about it.
//!
//! ## Usage
//!
//! ```bash
//! profile-rag --config ./config/profile-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `profile-rag ingest` | Fetch sources, chunk, embed, and persist the index |
//! | `profile-rag query "<question>"` | Run retrieval locally and print the hits |
//! | `profile-rag serve` | Start the HTTP chat API |
//! | `profile-rag status` | Show the state of the persisted index |
//! | `profile-rag completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # Preview what would be ingested
//! profile-rag ingest --dry-run
//!
//! # Build the index
//! profile-rag ingest
//!
//! # Inspect retrieval for a question
//! profile-rag query "What is Qudus's job?" --k 2
//!
//! # Serve the chat API
//! profile-rag serve
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use profile_rag::config;
use profile_rag::ingest;
use profile_rag::query::{self, QueryOutput};
use profile_rag::server;
use profile_rag::status;

/// profile-rag: retrieval-augmented answers about a professional profile.
///
/// All commands except `completions` read a TOML configuration file.
/// See `config/profile-rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "profile-rag",
    about = "Retrieval-augmented question answering over a professional profile",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/profile-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from every configured source.
    ///
    /// Replaces any previous build. Nothing is written if a required
    /// source or any embedding batch fails.
    Ingest {
        /// Fetch and chunk only; print counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve the chunks nearest to a question.
    Query {
        /// The question to embed.
        question: String,

        /// Number of chunks to return (defaults to `[retrieval].k`).
        #[arg(long)]
        k: Option<usize>,

        /// Print the retrieval as JSON.
        #[arg(long, conflicts_with = "context")]
        json: bool,

        /// Print the concatenated context string.
        #[arg(long)]
        context: bool,
    },

    /// Start the HTTP chat API on `[server].bind`.
    Serve,

    /// Show the state of the persisted index.
    Status,

    /// Print a shell completion script to stdout.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "profile-rag", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Query {
            question,
            k,
            json,
            context,
        } => {
            let output = if json {
                QueryOutput::Json
            } else if context {
                QueryOutput::Context
            } else {
                QueryOutput::Hits
            };
            query::run_query(&cfg, &question, k, output).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
