//! YAML run configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gfs: GfsConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GfsConfig {
    /// grib-filter CGI endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Directory tree holding the `.idx` sidecars used for cycle probes.
    #[serde(default = "default_probe_base_url")]
    pub probe_base_url: String,
    #[serde(default = "default_publication_delay_hours")]
    pub publication_delay_hours: u32,
    /// Variable names as the filter spells them, e.g. `TMP`.
    pub variables: Vec<String>,
    /// Level names as the filter spells them, e.g. `2_m_above_ground`.
    pub levels: Vec<String>,
    pub region: Region,
}

/// Bounding box passed to the filter's subregion query.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Region {
    pub toplat: f64,
    pub bottomlat: f64,
    pub leftlon: f64,
    pub rightlon: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub max_hour: u32,
    pub step: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            max_hour: 48,
            step: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub base_folder: PathBuf,
    pub max_concurrency: usize,
    /// Attempts per request, probes included.
    pub retry_count: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
    /// Expected minimum size of a grid file, 0 if unknown.
    pub min_file_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_folder: default_base_folder(),
            max_concurrency: 5,
            retry_count: 3,
            retry_delay_secs: 2,
            timeout_secs: 60,
            min_file_bytes: 0,
        }
    }
}

fn default_base_url() -> String {
    "https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_0p25.pl".to_string()
}

fn default_probe_base_url() -> String {
    "https://nomads.ncep.noaa.gov/pub/data/nccf/com/gfs/prod".to_string()
}

fn default_publication_delay_hours() -> u32 {
    4
}

fn default_base_folder() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gfs-data")
}

/// Loads and validates a configuration file.
pub fn load(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file `{}`", path.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing config file `{}`", path.display()))?;
    config.validate()?;

    Ok(config)
}

impl Config {
    /// Rejects configurations that would waste a whole download cycle. Runs
    /// before any network activity.
    pub fn validate(&self) -> Result<()> {
        let region = &self.gfs.region;
        if region.bottomlat >= region.toplat {
            bail!(
                "region: bottomlat ({}) must be south of toplat ({})",
                region.bottomlat,
                region.toplat
            );
        }
        if !(-90.0..=90.0).contains(&region.bottomlat) || !(-90.0..=90.0).contains(&region.toplat) {
            bail!("region: latitudes must lie within [-90, 90]");
        }
        if region.leftlon == region.rightlon {
            bail!("region: longitude span is empty (leftlon == rightlon)");
        }
        if self.gfs.variables.is_empty() {
            bail!("gfs: no variables requested");
        }
        if self.gfs.levels.is_empty() {
            bail!("gfs: no levels requested");
        }
        if self.forecast.step == 0 {
            bail!("forecast: step must be at least 1");
        }
        if self.download.max_concurrency == 0 {
            bail!("download: max_concurrency must be at least 1");
        }

        Ok(())
    }

    pub fn publication_delay(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.gfs.publication_delay_hours))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.download.retry_count,
            Duration::from_secs(self.download.retry_delay_secs),
        )
    }
}

// -- Tests -------------------------------------------------------------------
