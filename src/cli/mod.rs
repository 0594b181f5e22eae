//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "docfuse",
    version,
    author = "neur0map",
    about = "Hybrid retrieval and rank fusion for document question answering",
    long_about = "Docfuse runs a query against a local chunk corpus through semantic and keyword \
                  retrieval, fuses the two rankings, applies intent-aware diversity rules and \
                  reports how confident the evidence is."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/docfuse/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Named profile from the config file (e.g., "precise", "recall")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Retrieve and fuse passages for a query
    Query {
        /// Search query text
        query: String,

        /// Corpus file (JSON array or JSON Lines of chunks)
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Organization to search within
        #[arg(long)]
        org: String,

        /// Dataset to search (repeatable; defaults to every dataset of the organization)
        #[arg(short, long = "dataset", value_name = "ID")]
        datasets: Vec<String>,

        /// Force an intent instead of classifying the query (e.g., "AUTH", "code_example")
        #[arg(short, long)]
        intent: Option<String>,

        /// Bias results toward a document
        #[arg(long, value_name = "DOC_ID")]
        prefer_doc: Option<String>,

        /// Bias results toward a brand or product name
        #[arg(long)]
        brand: Option<String>,

        /// Bias results toward chunks mentioning an endpoint
        #[arg(long, value_name = "ENDPOINT")]
        last_endpoint: Option<String>,

        /// Number of passages to return
        #[arg(short, long)]
        k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,

        /// Skip the embedding model and use keyword retrieval only
        #[arg(long)]
        lexical_only: bool,

        /// Retry low-confidence results with a wider search
        #[arg(long)]
        fallback: bool,
    },

    /// Run a golden query set and report branch accuracy
    Eval {
        /// Corpus file (JSON array or JSON Lines of chunks)
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Golden cases (TOML with [[case]] tables, or JSON)
        #[arg(long, value_name = "FILE")]
        cases: PathBuf,

        /// Show the report in JSON format
        #[arg(long)]
        json: bool,

        /// Skip the embedding model and use keyword retrieval only
        #[arg(long)]
        lexical_only: bool,
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
    fn test_parse_query() {
        let cli = Cli::try_parse_from([
            "docfuse",
            "query",
            "how do I authenticate",
            "--corpus",
            "chunks.jsonl",
            "--org",
            "acme",
            "-d",
            "api",
            "-d",
            "guides",
            "--lexical-only",
            "--fallback",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                query,
                org,
                datasets,
                lexical_only,
                fallback,
                json,
                ..
            } => {
                assert!(fallback);
                assert_eq!(query, "how do I authenticate");
                assert_eq!(org, "acme");
                assert_eq!(datasets, vec!["api", "guides"]);
                assert!(lexical_only);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_profile_after_subcommand() {
        let cli = Cli::try_parse_from(["docfuse", "config", "show", "--profile", "precise"]).unwrap();
        assert_eq!(cli.profile.as_deref(), Some("precise"));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }
}
