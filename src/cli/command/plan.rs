//! Dry run: resolve the latest cycle and list its downloads.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use crate::{cli::create_spinner, config, cycle::CycleResolver, request::build_tasks};

use super::http_client;

pub async fn plan(config_path: &Path) -> Result<String> {
    let config = config::load(config_path)?;
    let client = http_client(&config)?;

    let bar = create_spinner("Resolving latest cycle...".to_string());
    let resolver = CycleResolver::new(
        client,
        config.gfs.probe_base_url.clone(),
        config.retry_policy(),
    );
    let cycle = resolver
        .resolve(Utc::now(), config.publication_delay())
        .await?;
    bar.finish_with_message(format!("Using cycle {cycle}"));

    let tasks = build_tasks(&cycle, &config)?;
    for task in &tasks {
        println!("{}  ->  {}", task.url, task.dest.display());
    }

    Ok(format!("{} downloads planned for cycle {cycle}", tasks.len()))
}
