//! Command-line interface definition for Campfire
//!
//! Defined with clap's derive API. The binary is a server first: with no
//! subcommand it serves.

use clap::{Parser, Subcommand};

/// Campfire - offline conversational agent runtime
///
/// Serves the chat API over a local LLM with session-scoped retrieval
/// and tool calling. Configuration comes from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "campfire")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP API server (default)
    Serve,

    /// Apply pending schema migrations and exit
    Migrate,

    /// Check the store and provider, report status, and exit
    Health,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
