//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (defaults to advmux.toml)
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register the demo items, advertise for a while and print diagnostics
    Run {
        /// Seconds to advertise for
        #[arg(short, long, default_value_t = 5)]
        duration: u64,

        /// Default interval preset to select once items are live
        #[arg(short, long)]
        preset: Option<usize>,

        /// Have the controller terminate this set once mid-run
        #[arg(long)]
        terminate: Option<u8>,

        /// Print the final set layouts as well
        #[arg(long)]
        layouts: bool,
    },
    /// Print the effective configuration as JSON
    ShowConfig,
}
