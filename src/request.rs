//! Builds one download request per forecast hour for a resolved cycle.

use std::path::PathBuf;

use anyhow::Result;

use crate::{config::Config, cycle::ForecastCycle};

/// One grid file to retrieve. Consumed exactly once by the fetch pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    /// Expected minimum byte size, 0 if unknown.
    pub min_bytes: u64,
}

impl DownloadTask {
    /// File name component of the destination, for log lines.
    pub fn file_name(&self) -> String {
        self.dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.dest.display().to_string())
    }
}

/// Produces the ordered task list for a cycle. Deterministic: the same cycle
/// and config always yield the same tasks, and no two tasks (of any cycle)
/// share a destination path.
pub fn build_tasks(cycle: &ForecastCycle, config: &Config) -> Result<Vec<DownloadTask>> {
    config.validate()?;

    let selection = selection_query(config);
    let dir = format!("/gfs.{}/{:02}/atmos", cycle.compact_date(), cycle.hour);
    let folder = config
        .download
        .base_folder
        .join("gfs")
        .join(cycle.compact_date())
        .join(format!("{:02}", cycle.hour));

    let mut tasks = Vec::new();
    let mut hour = 0;
    while hour <= config.forecast.max_hour {
        let file = format!("gfs.t{:02}z.pgrb2.0p25.f{:03}", cycle.hour, hour);
        tasks.push(DownloadTask {
            url: format!("{}?file={}&dir={}{}", config.gfs.base_url, file, dir, selection),
            dest: folder.join(&file),
            min_bytes: config.download.min_file_bytes,
        });
        hour += config.forecast.step;
    }

    Ok(tasks)
}

/// Variable, level and subregion parameters shared by every request in the
/// run. Asking the server to subset keeps the transfer down to the requested
/// region instead of shipping the global grid.
fn selection_query(config: &Config) -> String {
    let mut query = String::new();
    for variable in &config.gfs.variables {
        query.push_str(&format!("&var_{variable}=on"));
    }
    for level in &config.gfs.levels {
        query.push_str(&format!("&lev_{level}=on"));
    }

    let region = &config.gfs.region;
    query.push_str(&format!(
        "&subregion=&toplat={}&leftlon={}&rightlon={}&bottomlat={}",
        region.toplat, region.leftlon, region.rightlon, region.bottomlat
    ));

    query
}

// -- Tests -------------------------------------------------------------------
