use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// insightd: coaching insight generation service
#[derive(Parser)]
#[command(name = "insightd", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to INSIGHTS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate insights once from a dataset file and print them as JSON
    Generate {
        /// JSON array of performance data points
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, conflicts_with = "team_id")]
        athlete_id: Option<String>,
        #[arg(long)]
        team_id: Option<String>,
        /// Model identifier (defaults to INSIGHTS_MODEL)
        #[arg(long)]
        model: Option<String>,
    },
}
