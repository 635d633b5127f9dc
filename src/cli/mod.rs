//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::download::RetryPolicy;
use command::{maritime::MaritimeGroup, sea_level};

const OUTPUT_DIR_NAME: &str = "climate-feeds";

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands and the options shared by all of them
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory the datasets are written to [default: ~/climate-feeds]
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Attempts per request before giving up
    #[arg(long, global = true, default_value_t = 3)]
    pub attempts: usize,

    /// Timeout of the first attempt, in seconds
    #[arg(long, global = true, default_value_t = 180)]
    pub timeout_secs: u64,

    /// Seconds added to the timeout after each timed-out attempt
    #[arg(long, global = true, default_value_t = 60)]
    pub timeout_step_secs: u64,

    /// Pause between attempts after a failed response, in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub retry_delay_secs: u64,

    /// Download even when the local copy looks up to date
    #[arg(long, global = true)]
    pub force: bool,

    /// Also write a parquet file next to each CSV
    #[arg(long, global = true)]
    pub parquet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get OECD maritime CO2 emissions
    Maritime {
        /// Fetch only one of the two tables
        #[arg(long, value_enum)]
        only: Option<MaritimeGroup>,
    },
    /// Get annual mean temperature per country
    Climate {
        #[arg(long)]
        from_year: Option<i64>,
        #[arg(long)]
        to_year: Option<i64>,
    },
    /// Get global mean sea level
    SeaLevel {
        /// Fall back to a synthesized series when every source fails
        #[arg(long)]
        allow_synthetic: bool,
        #[arg(long, default_value_t = sea_level::FIRST_YEAR)]
        from_year: i64,
        #[arg(long, default_value_t = sea_level::LAST_YEAR)]
        to_year: i64,
    },
    /// Get sea level per ocean region and the country to region mapping
    SeaLevelRegional {
        #[arg(long, default_value_t = sea_level::FIRST_YEAR)]
        from_year: i64,
        #[arg(long, default_value_t = sea_level::LAST_YEAR)]
        to_year: i64,
    },
    /// Refresh every dataset
    All {
        #[arg(long)]
        allow_synthetic: bool,
    },
    /// Report which datasets are out of date without downloading them
    Check {},
    /// Print the first rows of a saved dataset
    Show {
        /// Dataset name, e.g. `climate_temperature`
        dataset: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        rows: usize,
    },
}

impl Cli {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.attempts,
            timeout: Duration::from_secs(self.timeout_secs),
            timeout_step: Duration::from_secs(self.timeout_step_secs),
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(OUTPUT_DIR_NAME)))
            .unwrap_or_else(|| PathBuf::from("."))
    }
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
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    )
}

/// Turns a spinner into a byte counter once the download size is known.
pub fn set_byte_progress_style(bar: &ProgressBar, total_size: u64) {
    bar.set_length(total_size);
    bar.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-"),
    );
}

// -- Tests -------------------------------------------------------------------
