//! Policy inspection command

use colored::Colorize;
use log::debug;

use crate::cache::PolicyTable;
use crate::cache::policy::domain_of;
use crate::cli::{GlobalOptions, OutputFormat};
use crate::config::Config;
use crate::error::Result;
use crate::output::display::PolicyRow;
use crate::output::print_rows;

/// Show the policy for each URL, or every configured domain when none are given
pub fn run(opts: &GlobalOptions, urls: &[String]) -> Result<()> {
    let config = Config::load_at(opts.config_ref())?;
    let table = config.policy_table();

    let rows = if urls.is_empty() {
        configured_rows(&config, &table)
    } else {
        resolve_rows(urls, &table)?
    };
    debug!("Resolved {} policy rows", rows.len());

    match opts.format {
        OutputFormat::Pretty => print_pretty(&rows),
        format => print_rows(&rows, format)?,
    }
    Ok(())
}

fn configured_rows(config: &Config, table: &PolicyTable) -> Vec<PolicyRow> {
    let mut rows: Vec<PolicyRow> = config
        .domains
        .keys()
        .map(|domain| PolicyRow::resolve(domain, domain, table))
        .collect();
    // An empty host never matches a configured domain
    rows.push(PolicyRow::resolve("(any other host)", "", table));
    rows
}

fn resolve_rows(urls: &[String], table: &PolicyTable) -> Result<Vec<PolicyRow>> {
    urls.iter()
        .map(|url| {
            let domain = domain_of(url)?;
            Ok(PolicyRow::resolve(url, &domain, table))
        })
        .collect()
}

fn print_pretty(rows: &[PolicyRow]) {
    for row in rows {
        println!("{}", row.target.bold());
        println!("  domain:    {}", row.matched.cyan());
        println!("  cool-down: {}", row.cooldown);
        println!("  refresh:   {}", row.refresh);
    }
}
