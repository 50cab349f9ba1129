//! Resolve, download and verify the latest published cycle.

use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cli::{create_progress_bar, create_spinner},
    config,
    cycle::CycleResolver,
    download::FetchPool,
    request::{build_tasks, DownloadTask},
    verify,
};

use super::http_client;

pub async fn fetch(config_path: &Path) -> Result<String> {
    let config = config::load(config_path)?;
    let client = http_client(&config)?;

    let bar = create_spinner("Resolving latest cycle...".to_string());
    let resolver = CycleResolver::new(
        client.clone(),
        config.gfs.probe_base_url.clone(),
        config.retry_policy(),
    );
    let cycle = resolver
        .resolve(Utc::now(), config.publication_delay())
        .await?;
    bar.finish_with_message(format!("Using cycle {cycle}"));

    let tasks = build_tasks(&cycle, &config)?;
    let (pending, skipped) = split_already_complete(tasks.clone());
    for task in &skipped {
        info!("skipping existing file {}", task.file_name());
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_watcher(cancel.clone());

    if pending.is_empty() {
        info!("all {} files already present", tasks.len());
    } else {
        info!(
            "downloading {} of {} files for cycle {cycle}",
            pending.len(),
            tasks.len()
        );
        let bar = create_progress_bar(pending.len() as u64, format!("Downloading cycle {cycle}"));
        let pool = FetchPool::new(client, config.download.max_concurrency, config.retry_policy());
        let results = pool.run(pending, &cancel, &bar).await;
        bar.finish_with_message("Downloads finished");

        let failed = results
            .iter()
            .filter(|result| !result.outcome.is_success())
            .count();
        if failed > 0 {
            warn!("{failed} download(s) did not complete");
        }
    }

    let report = verify::verify(&tasks);
    info!(
        "verification: {} ok, {} missing, {} undersized",
        report.verified,
        report.missing.len(),
        report.undersized.len()
    );

    if cancel.is_cancelled() {
        bail!(
            "run incomplete: interrupted with {} of {} files verified",
            report.verified,
            tasks.len()
        );
    }
    if !report.is_complete() {
        bail!("{} of {} files failed verification", report.failed(), tasks.len());
    }

    Ok(format!(
        "{} files for cycle {cycle} verified under `{}`",
        tasks.len(),
        config.download.base_folder.display()
    ))
}

/// Reruns skip destinations that already hold a plausible file. Skipped tasks
/// still go through verification with everything else.
fn split_already_complete(tasks: Vec<DownloadTask>) -> (Vec<DownloadTask>, Vec<DownloadTask>) {
    tasks.into_iter().partition(|task| {
        match std::fs::metadata(&task.dest) {
            Ok(meta) => meta.len() < task.min_bytes.max(1),
            Err(_) => true,
        }
    })
}

fn spawn_interrupt_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting in-flight downloads");
            cancel.cancel();
        }
    });
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    fn task(dir: &TempDir, name: &str) -> DownloadTask {
        DownloadTask {
            url: format!("http://example.invalid/{name}"),
            dest: dir.path().join(name),
            min_bytes: 0,
        }
    }

    #[test]
    fn should_skip_destinations_that_already_hold_a_file() {
        let dir = TempDir::new().unwrap();
        let complete = task(&dir, "f000");
        let absent = task(&dir, "f003");
        std::fs::write(&complete.dest, b"GRIB data").unwrap();

        let (pending, skipped) = split_already_complete(vec![complete.clone(), absent.clone()]);

        assert_eq!(pending, vec![absent]);
        assert_eq!(skipped, vec![complete]);
    }

    #[test]
    fn should_not_skip_an_empty_leftover_file() {
        let dir = TempDir::new().unwrap();
        let empty = task(&dir, "f000");
        std::fs::write(&empty.dest, b"").unwrap();

        let (pending, skipped) = split_already_complete(vec![empty.clone()]);

        assert_eq!(pending, vec![empty]);
        assert!(skipped.is_empty());
    }
}
