mod address;
mod aggregate;
mod basin;
mod cli;
mod config;
mod db;
mod download;
mod error;
mod parquet;
mod pipeline;
mod raster;
mod refresh;
mod time_unit;
mod window;

use std::process::ExitCode;

use clap::Parser;
use cli::{command, Cli, Commands};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match &cli.command {
        Commands::Sync(args) => command::sync(args).await.map(|report| {
            info!(
                fetched = report.fetched,
                not_found = report.not_found,
                rasters = report.rasters_written,
                basin_rows = report.basin_rows_written,
                "Run finished"
            );
            if let Some(path) = report.exported {
                println!("File saved to `{}`", path.display());
            }
        }),
        Commands::Plan(args) => command::plan(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
