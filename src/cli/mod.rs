//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "newsvec",
    version,
    author = "neur0map",
    about = "Similarity search over news-article embeddings",
    long_about = "newsvec maintains a vector index of news-article embeddings, migrates it from a flat \
                  exact layout to a clustered one, and finds historically comparable articles for a \
                  piece of news text."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/newsvec/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a flat exact index into a clustered index
    Migrate {
        /// Directory for the timestamped backups (defaults to the index directory)
        #[arg(long, value_name = "DIR")]
        backup_dir: Option<PathBuf>,
    },

    /// Create an empty index and metadata file
    Init {
        /// Overwrite an existing index
        #[arg(short, long)]
        force: bool,
    },

    /// Show index statistics
    Status,

    /// Find articles similar to a piece of text
    Search {
        /// News text to compare against the index
        text: String,

        /// Only return articles for this stock code
        #[arg(short, long)]
        stock: Option<String>,

        /// Maximum number of results (defaults to search.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum similarity (defaults to search.similarity_threshold)
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Embed articles from a JSON dump that are not yet indexed
    Embed {
        /// JSON file with an `articles` array
        #[arg(value_name = "FILE")]
        articles: PathBuf,

        /// Maximum articles per run (defaults to job.batch_size)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
