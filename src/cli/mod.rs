//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

pub mod args;
pub mod cache;
pub mod fetch;
pub mod policy;

pub use args::{GlobalOptions, OutputFormat};

/// scenecache - local disk cache for scenery resources fetched over HTTP
#[derive(Parser, Debug)]
#[command(name = "scenecache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "SCENECACHE_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "SCENECACHE_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override cache directory
    #[arg(long, global = true, env = "SCENECACHE_DIR", hide_env = true)]
    pub cache_dir: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "SCENECACHE_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch resources into the cache, reusing fresh copies
    #[command(after_help = "EXAMPLES:\n  \
        scenecache fetch https://tiles.example.com/+47-122.dds\n  \
        scenecache fetch --key objects/tree.obj https://lib.example.com/tree.obj")]
    Fetch {
        /// Resource URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Logical resource key (only with a single URL; defaults to a URL hash)
        #[arg(long)]
        key: Option<String>,

        /// Expected size in bytes, used to pre-size the transfer buffer
        #[arg(long)]
        size_hint: Option<usize>,
    },

    /// Show the cool-down and refresh policy that applies to URLs
    Policy {
        /// Resource URLs (omit to list configured domains)
        urls: Vec<String>,
    },

    /// Manage the local cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Display version information
    Version,
}

/// Cache management subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Status,

    /// List cached resources
    List,

    /// Remove every cached resource
    Clear,

    /// Forget one resource (by key or URL)
    Evict {
        /// Resource key, or a URL to derive it from
        target: String,
    },

    /// Print the cache directory
    Path,
}
