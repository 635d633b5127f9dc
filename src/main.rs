mod cli;
mod download;
mod error;
mod freshness;
mod parquet;
mod reading;
mod store;
mod table;

use std::process::ExitCode;

use anyhow::{Error, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{
    command::{self, sea_level, Context, RunSummary},
    Cli, Commands,
};
use download::ReqwestSource;
use reading::YearWindow;
use store::{DatasetFiles, TableCache};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode, Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let output_dir = cli.output_dir();

    let source = ReqwestSource::new(true)?;
    let ctx = Context {
        source: &source,
        policy: cli.retry_policy(),
        output_dir,
        force: cli.force,
        parquet: cli.parquet,
    };
    info!("output directory `{}`", ctx.output_dir.display());

    let sea_level_window = |from, to| YearWindow::new(Some(from), Some(to));
    let summary = match &cli.command {
        Commands::Maritime { only } => command::maritime(&ctx, *only).await,
        Commands::Climate { from_year, to_year } => {
            command::climate(&ctx, YearWindow::new(*from_year, *to_year)).await
        }
        Commands::SeaLevel {
            allow_synthetic,
            from_year,
            to_year,
        } => {
            let window = sea_level_window(*from_year, *to_year);
            command::sea_level(&ctx, window, *allow_synthetic).await
        }
        Commands::SeaLevelRegional { from_year, to_year } => {
            command::regional(&ctx, sea_level_window(*from_year, *to_year)).await
        }
        Commands::All { allow_synthetic } => {
            let mut summary = RunSummary::new();
            summary.merge(command::maritime(&ctx, None).await);
            summary.merge(command::climate(&ctx, YearWindow::default()).await);
            let window = sea_level_window(sea_level::FIRST_YEAR, sea_level::LAST_YEAR);
            summary.merge(command::sea_level(&ctx, window, *allow_synthetic).await);
            summary.merge(command::regional(&ctx, window).await);
            summary
        }
        Commands::Check {} => {
            command::check(&ctx).await;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Show { dataset, rows } => {
            let mut cache = TableCache::new();
            let files = DatasetFiles::new(&ctx.output_dir, dataset);
            return Ok(match command::show(&mut cache, &files, *rows) {
                Ok(text) => {
                    print!("{text}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {e:#}");
                    ExitCode::FAILURE
                }
            });
        }
    };

    summary.print();
    if summary.any_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        error!("no dataset could be fetched or written");
        Ok(ExitCode::FAILURE)
    }
}
