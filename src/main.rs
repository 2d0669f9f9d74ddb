//! scenecache - local disk cache for scenery resources fetched over HTTP

use clap::Parser;

mod cache;
mod cli;
mod config;
mod error;
mod output;
mod transfer;

use cli::{CacheCommands, Cli, Commands, GlobalOptions};
use error::Result;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Fetch {
            urls,
            key,
            size_hint,
        } => cli::fetch::run(&opts, &urls, key.as_deref(), size_hint).await,
        Commands::Policy { urls } => cli::policy::run(&opts, &urls),
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Status => cli::cache::status(&opts),
            CacheCommands::List => cli::cache::list(&opts),
            CacheCommands::Clear => cli::cache::clear(&opts),
            CacheCommands::Evict { target } => cli::cache::evict(&opts, &target),
            CacheCommands::Path => cli::cache::path(&opts),
        },
        Commands::Version => {
            println!("scenecache version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
