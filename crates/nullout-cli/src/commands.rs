use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "nullout")]
#[command(
    about = "Find and safely delete files Windows cannot handle by name",
    long_about = None
)]
pub struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the allowlisted roots
    Roots,
    /// Scan a root (id or path) for hazardous names
    Scan { root: String },
    /// Scan a root and issue confirmation tokens for its findings
    Plan {
        root: String,
        /// Only plan findings whose relative path matches (repeatable)
        #[arg(long = "select", value_name = "GLOB")]
        select: Vec<String>,
    },
    /// Delete the entries bound to confirmation tokens
    Delete {
        #[arg(required = true, value_name = "TOKEN")]
        tokens: Vec<String>,
    },
    /// Show processes holding an entry beneath a root
    WhoIsUsing { root: String, relative_path: String },
    /// Show version, policy and limits
    Info,
    /// Print configuration values
    PrintConfig,
}
