pub mod fetch;
pub mod plan;

use std::time::Duration;

use anyhow::{Context, Result};
pub use fetch::fetch;
pub use plan::plan;

use crate::config::Config;

pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.download.timeout_secs))
        .user_agent(concat!("gfsdl/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}
