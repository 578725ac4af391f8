//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "know",
    version,
    about = "Personal knowledge base with background AI enrichment",
    long_about = "Know stores articles and enriches them in the background: a language model \
                  assigns topic tags, writes a short summary and computes an embedding so \
                  articles can be found by meaning."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/know/config.toml)
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
    /// Start the daemon in the background
    Start,

    /// Run the daemon in the foreground
    Run,

    /// Stop the daemon
    Stop,

    /// Show daemon and enrichment status
    Status,

    /// Add an article
    Add {
        /// Article title
        #[arg(short, long)]
        title: String,

        /// Article body; read from stdin when omitted
        #[arg(long)]
        content: Option<String>,

        /// Read the body from a file
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,

        #[arg(long, default_value = "")]
        category: String,

        #[arg(long, default_value = "")]
        author: String,

        /// Author-supplied tags (repeatable); generated tags are used otherwise
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Replace an article's title and body; enrichment is redone
    Edit {
        id: i64,

        #[arg(short, long)]
        title: String,

        #[arg(long)]
        content: Option<String>,

        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,

        #[arg(long, default_value = "")]
        category: String,

        /// Replacement tags (repeatable); tags are regenerated when omitted
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete an article
    Delete { id: i64 },

    /// Show one article with its tags and summary
    Show {
        id: i64,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Find articles similar in meaning to a query
    Search {
        query: String,

        /// Maximum number of results to return
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// List tags by number of articles
    Tags {
        /// Show only the most frequent tags
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Queue articles missing tags or a summary, or one article by id
    Sweep {
        /// Re-queue only this article, whatever its state
        #[arg(long)]
        id: Option<i64>,
    },

    /// Load articles from the public BoolQ dataset and queue them for enrichment
    Seed {
        /// Number of articles to load (100 when not positive, at most 5000)
        #[arg(short = 'n', long, default_value = "100", allow_negative_numbers = true)]
        count: i64,
    },

    /// Delete every article, vector and tag count
    Clear {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_add_with_repeated_tags() {
        let cli = Cli::try_parse_from([
            "know", "add", "--title", "Ownership", "--content", "body", "--tag", "Rust", "--tag",
            "Memory",
        ])
        .unwrap();

        match cli.command {
            Commands::Add { title, tags, .. } => {
                assert_eq!(title, "Ownership");
                assert_eq!(tags, vec!["Rust", "Memory"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_content_and_file_conflict() {
        let result = Cli::try_parse_from([
            "know", "add", "--title", "T", "--content", "x", "--file", "body.md",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_seed_count() {
        let cli = Cli::try_parse_from(["know", "seed", "-n", "250"]).unwrap();
        assert!(matches!(cli.command, Commands::Seed { count: 250 }));

        let cli = Cli::try_parse_from(["know", "seed"]).unwrap();
        assert!(matches!(cli.command, Commands::Seed { count: 100 }));
    }

    #[test]
    fn test_edit_with_tags() {
        let cli = Cli::try_parse_from([
            "know", "edit", "7", "--title", "T", "--content", "x", "--tag", "History",
        ])
        .unwrap();

        match cli.command {
            Commands::Edit { id, tags, .. } => {
                assert_eq!(id, 7);
                assert_eq!(tags, vec!["History"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
