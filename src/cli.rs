use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "streamsweep")]
#[command(author, version, about = "Live stream discovery and validation")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe every address an address template expands to
    Scan {
        /// Address template, e.g. http://10.0.0.[1-254]:8080/live
        #[arg(required = true)]
        template: String,

        /// Concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Per-probe timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        user_agent: Option<String>,

        #[arg(long)]
        referer: Option<String>,

        /// Retry retryable failures once the scan finishes
        #[arg(long)]
        retry: bool,

        /// Keep retrying until a pass finds nothing new (implies --retry)
        #[arg(long = "loop")]
        loop_mode: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Re-check a list of addresses (one per line)
    Validate {
        /// File with addresses; `-` reads stdin
        #[arg(required = true)]
        file: PathBuf,

        #[arg(short, long)]
        workers: Option<usize>,

        #[arg(short, long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Print the addresses a template expands to without probing
    Expand {
        #[arg(required = true)]
        template: String,

        /// Stop after this many addresses
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Resolve a raw channel name against the mapping tables
    Lookup {
        #[arg(required = true)]
        raw_name: String,
    },

    /// Add a user mapping from a raw name to a standard name
    Map {
        raw_name: String,
        standard_name: String,

        #[arg(long)]
        logo: Option<String>,

        #[arg(long)]
        group: Option<String>,
    },

    /// Remove a user mapping by standard name
    Unmap { standard_name: String },

    /// Fetch the remote mapping dataset now
    RefreshMappings {
        /// Fetch from this URL and save it to the config file on success
        #[arg(long)]
        url: Option<String>,
    },

    /// List fingerprints that resolved to conflicting names
    Unstable {
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Display version information
    Version,
}
