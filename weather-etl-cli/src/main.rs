//! Binary crate for the `weather-etl` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration
//! - Wiring the HTTP source and object store into a pipeline run

use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    weather_etl_core::logging::init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
