use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "datex-ingest")]
#[command(about = "Ingest DATEX traffic situations into per-map disturbance records")]
pub struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "datex-ingest.toml")]
    pub config: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override monitoring setting from config
    #[arg(long, global = true)]
    pub monitor: Option<bool>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Load the feed and resolve every situation through the modules
    Ingest {
        /// Only load and classify the feed, no module requests
        #[arg(long)]
        dry_run: bool,

        /// Override datex.mode (publish or sync)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Look up categories in the configured category tree
    Categories {
        /// Name or composite name to search for
        #[arg(long)]
        find: Option<String>,

        /// Language of the names
        #[arg(long)]
        lang: Option<String>,

        /// Only accept exact name matches
        #[arg(long)]
        exact: bool,
    },

    /// Inspect the map directory
    Maps {
        /// underview, overview, country or super
        #[arg(long, default_value = "underview")]
        level: String,
    },

    /// Write the stored disturbances of the provider as CSV
    Export {
        #[arg(short, long, default_value = "disturbances.csv")]
        output: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingest_with_global_flags() {
        let cli = Cli::parse_from([
            "datex-ingest",
            "ingest",
            "--dry-run",
            "--config",
            "demo.toml",
            "-v",
        ]);
        assert_eq!(cli.config, "demo.toml");
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Ingest {
                dry_run: true,
                mode: None
            }
        ));
    }

    #[test]
    fn test_parse_categories_search() {
        let cli = Cli::parse_from(["datex-ingest", "categories", "--find", "pizza", "--exact"]);
        let Command::Categories { find, exact, lang } = cli.command else {
            panic!("expected categories");
        };
        assert_eq!(find.as_deref(), Some("pizza"));
        assert!(exact);
        assert!(lang.is_none());
    }
}
