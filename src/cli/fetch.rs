//! Fetch command implementation

use std::time::Duration;

use colored::Colorize;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cache::{CacheManager, ResourceKey, Response, ResponseKind};
use crate::cli::{GlobalOptions, OutputFormat};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::display::ResponseRow;
use crate::output::{self, format_seconds};

/// Request every URL, wait for any download it starts, and report results
pub async fn run(
    opts: &GlobalOptions,
    urls: &[String],
    key: Option<&str>,
    size_hint: Option<usize>,
) -> Result<()> {
    if key.is_some() && urls.len() > 1 {
        return Err(Error::Other(
            "--key can only be used with a single URL".to_string(),
        ));
    }

    let config = Config::load_at(opts.config_ref())?;
    let manager = CacheManager::from_config(&config, opts.cache_dir_ref())?;

    let progress = progress_bar(opts.format, urls.len());
    let fetches = urls.iter().map(|url| {
        let key = key
            .map(ResourceKey::new)
            .unwrap_or_else(|| ResourceKey::from_url(url));
        let manager = &manager;
        let progress = &progress;
        async move {
            let result = fetch_one(manager, &key, url, size_hint).await;
            progress.inc(1);
            result
        }
    });
    let results = join_all(fetches).await;
    progress.finish_and_clear();
    manager.shutdown();

    let responses = results.into_iter().collect::<Result<Vec<_>>>()?;
    report(&responses, opts.format)?;

    check_outcome(&responses)
}

async fn fetch_one(
    manager: &CacheManager,
    key: &ResourceKey,
    url: &str,
    size_hint: Option<usize>,
) -> Result<Response> {
    let response = manager.request(key, url, size_hint)?;
    match response.kind {
        ResponseKind::DownloadStarted | ResponseKind::DownloadInProgress => {
            Ok(manager.wait(key).await.unwrap_or(response))
        }
        _ => Ok(response),
    }
}

fn progress_bar(format: OutputFormat, total: usize) -> ProgressBar {
    if format != OutputFormat::Pretty {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {pos}/{len} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message("fetching");
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn report(responses: &[Response], format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Pretty {
        let rows: Vec<ResponseRow> = responses.iter().map(ResponseRow::from).collect();
        return output::print_rows(&rows, format);
    }

    for response in responses {
        match &response.kind {
            ResponseKind::CacheHit { path } => {
                println!("{} {}", "✓".green(), response.url);
                println!("  → {}", path.display().to_string().cyan());
            }
            ResponseKind::DownloadStarted | ResponseKind::DownloadInProgress => {
                println!("{} {} (still downloading)", "…".yellow(), response.url);
            }
            ResponseKind::CoolingDown { seconds_left } => {
                println!(
                    "{} {} cooling down, retry in {}",
                    "⚠".yellow(),
                    response.url,
                    format_seconds(*seconds_left)
                );
            }
            ResponseKind::Error { classification } => {
                println!(
                    "{} {} {}",
                    "✗".red(),
                    response.url,
                    format!("({} error)", classification).dimmed()
                );
            }
        }
    }
    Ok(())
}

/// Turn the worst response into the command's error
fn check_outcome(responses: &[Response]) -> Result<()> {
    let failed = responses
        .iter()
        .filter(|r| matches!(r.kind, ResponseKind::Error { .. }))
        .count();
    if failed > 0 {
        return Err(Error::Other(format!(
            "{} of {} resources failed to download",
            failed,
            responses.len()
        )));
    }

    if let Some((key, seconds_left)) = responses.iter().find_map(|r| match r.kind {
        ResponseKind::CoolingDown { seconds_left } => Some((r.key.to_string(), seconds_left)),
        _ => None,
    }) {
        return Err(Error::PolicyBlocked { key, seconds_left });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::path::PathBuf;

    fn response(kind: ResponseKind) -> Response {
        Response {
            key: ResourceKey::new("k"),
            url: "https://tiles.example.com/a.dds".to_string(),
            kind,
        }
    }

    #[test]
    fn test_check_outcome_all_hits() {
        let responses = vec![response(ResponseKind::CacheHit {
            path: PathBuf::from("/c/a.dds"),
        })];
        assert!(check_outcome(&responses).is_ok());
    }

    #[test]
    fn test_check_outcome_cooling_down_is_policy_blocked() {
        let responses = vec![response(ResponseKind::CoolingDown { seconds_left: 30 })];
        match check_outcome(&responses) {
            Err(Error::PolicyBlocked { seconds_left, .. }) => assert_eq!(seconds_left, 30),
            other => panic!("expected PolicyBlocked, got {:?}", other),
        }
    }

    #[test]
    fn test_check_outcome_failure_wins() {
        let responses = vec![
            response(ResponseKind::CoolingDown { seconds_left: 30 }),
            response(ResponseKind::Error {
                classification: FailureKind::Transport,
            }),
        ];
        let err = check_outcome(&responses).unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
    }
}
