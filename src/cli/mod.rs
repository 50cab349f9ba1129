//! Command line interface.

pub mod command;

use std::path::PathBuf;
use std::time::Duration;

use clap::{command, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download and verify the latest published cycle
    Fetch {
        /// Path to the YAML configuration file
        #[arg(short, long, default_value = "gfs.yaml")]
        config: PathBuf,
    },
    /// Resolve the latest cycle and list its downloads without fetching
    Plan {
        /// Path to the YAML configuration file
        #[arg(short, long, default_value = "gfs.yaml")]
        config: PathBuf,
    },
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    )
}
