//! Cache management commands

use colored::Colorize;

use crate::cache::policy::domain_of;
use crate::cache::{CacheManager, ResourceKey};
use crate::cli::{GlobalOptions, OutputFormat};
use crate::config::Config;
use crate::error::Result;
use crate::output::display::IndexRow;
use crate::output::{format_size, format_timestamp, json, print_rows};

fn open(opts: &GlobalOptions) -> Result<(Config, CacheManager)> {
    let config = Config::load_at(opts.config_ref())?;
    let manager = CacheManager::from_config(&config, opts.cache_dir_ref())?;
    Ok((config, manager))
}

/// Show cache status/statistics
pub fn status(opts: &GlobalOptions) -> Result<()> {
    let (_, manager) = open(opts)?;
    let stats = manager.stats()?;
    let path = manager.cache_root().display().to_string();

    match opts.format {
        OutputFormat::Json => {
            let data = serde_json::json!({
                "path": path,
                "total_entries": stats.total_entries,
                "domains": stats.domains,
                "total_size_bytes": stats.total_size_bytes,
                "total_size_human": format_size(stats.total_size_bytes),
                "oldest_entry_timestamp": stats.oldest_entry,
                "newest_entry_timestamp": stats.newest_entry,
            });
            println!("{}", json::format_json(&data)?);
        }
        _ => {
            println!("Cache Status");
            println!("────────────────────────────────────────");
            println!("Location:       {}", path);
            println!("Entries:        {}", stats.total_entries);
            println!("Domains:        {}", stats.domains);
            println!("Total size:     {}", format_size(stats.total_size_bytes));

            if let Some(oldest) = stats.oldest_entry {
                println!("Oldest entry:   {}", format_timestamp(oldest));
            }
            if let Some(newest) = stats.newest_entry {
                println!("Newest entry:   {}", format_timestamp(newest));
            }
        }
    }

    Ok(())
}

/// List persisted entries with their staleness under the current policy
pub fn list(opts: &GlobalOptions) -> Result<()> {
    let (_, manager) = open(opts)?;
    let now = chrono::Utc::now().timestamp();
    let rows: Vec<IndexRow> = manager
        .list_index()?
        .iter()
        .map(|record| IndexRow::new(record, manager.policies(), now))
        .collect();

    match opts.format {
        OutputFormat::Json => print_rows(&rows, OutputFormat::Json),
        _ => print_rows(&rows, OutputFormat::Table),
    }
}

/// Clear all cache entries
pub fn clear(opts: &GlobalOptions) -> Result<()> {
    let (_, manager) = open(opts)?;
    let stats = manager.clear()?;

    match opts.format {
        OutputFormat::Json => {
            let data = serde_json::json!({
                "entries_removed": stats.entries_removed,
                "success": true,
            });
            println!("{}", json::format_json(&data)?);
        }
        _ => {
            if stats.entries_removed > 0 {
                println!("Cleared {} cache entries", stats.entries_removed);
            } else {
                println!("Cache was already empty");
            }
        }
    }

    Ok(())
}

/// Forget one resource, given its key or the URL it was fetched from
pub fn evict(opts: &GlobalOptions, target: &str) -> Result<()> {
    let (_, manager) = open(opts)?;
    let key = key_for_target(target);
    let removed = manager.evict(&key)?;

    match opts.format {
        OutputFormat::Json => {
            let data = serde_json::json!({
                "key": key,
                "removed": removed,
            });
            println!("{}", json::format_json(&data)?);
        }
        _ => {
            if removed {
                println!("{} Evicted {}", "✓".green(), key);
            } else {
                println!("Nothing cached for {}", key);
            }
        }
    }

    Ok(())
}

/// Show cache path
pub fn path(opts: &GlobalOptions) -> Result<()> {
    let (_, manager) = open(opts)?;
    println!("{}", manager.cache_root().display());
    Ok(())
}

/// URLs map to their derived key; anything else is taken as a key
fn key_for_target(target: &str) -> ResourceKey {
    if domain_of(target).is_ok() {
        ResourceKey::from_url(target)
    } else {
        ResourceKey::new(target)
    }
}
