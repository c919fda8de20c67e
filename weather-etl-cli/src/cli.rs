use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Password, Select, Text};
use std::{path::PathBuf, sync::Arc};

use weather_etl_core::{
    City, Config, FailurePolicy, LocalObjectStore, NormalizedRecord, OpenWeatherSource,
    PipelineRunner,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Multi-city weather ETL")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every configured city and write one CSV batch.
    Run {
        /// Write the cities that succeeded even if others failed.
        #[arg(long)]
        lenient: bool,

        /// Do not retry a failed run.
        #[arg(long)]
        no_retry: bool,

        /// Directory backing the object store (overrides the config).
        #[arg(long)]
        root_dir: Option<PathBuf>,
    },

    /// Show the normalized observation for one city without writing it.
    Show {
        /// City name, e.g. "Paris".
        city: String,
    },

    /// Interactively set the API key, cities and bucket.
    Configure,

    /// Print the location of the config file.
    ConfigPath,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Run { lenient, no_retry, root_dir } => {
                let mut config = Config::load()?;
                if lenient {
                    config.run.failure_policy = FailurePolicy::Lenient;
                }
                let retries = if no_retry { 0 } else { config.run.retries };

                let runner = build_runner(&config, root_dir)?;
                let report = runner.run_with_retries(retries, config.run.retry_delay()).await?;

                println!("Wrote {} row(s) to {}", report.rows, report.destination);
                for failure in &report.failures {
                    println!("  skipped: {failure}");
                }
            }
            Command::Show { city } => {
                let config = Config::load()?;
                let runner = build_runner(&config, None)?;
                let record = runner.observe(&City::new(city)).await?;
                print_record(&record);
            }
            Command::Configure => configure()?,
            Command::ConfigPath => println!("{}", Config::config_file_path()?.display()),
        }

        Ok(())
    }
}

fn build_runner(config: &Config, root_dir: Option<PathBuf>) -> anyhow::Result<PipelineRunner> {
    config.validate()?;

    let source = OpenWeatherSource::new(
        config.require_api_key()?,
        &config.source.base_url,
        config.source.request_timeout(),
    )?;

    let root = match root_dir {
        Some(root) => root,
        None => config.storage.resolved_root()?,
    };
    tracing::debug!(root = %root.display(), "using local object store");

    Ok(PipelineRunner::from_config(
        config,
        Arc::new(source),
        Arc::new(LocalObjectStore::new(root)),
    ))
}

fn configure() -> anyhow::Result<()> {
    let mut config = Config::load()?;

    let api_key = Password::new("OpenWeather API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    if !api_key.trim().is_empty() {
        config.set_api_key(api_key.trim().to_string());
    }

    let current: Vec<_> = config.cities.iter().map(City::name).collect();
    let cities = Text::new("Cities (comma separated):")
        .with_default(&current.join(", "))
        .prompt()
        .context("Failed to read city list")?;
    config.set_cities_from_list(&cities);

    config.storage.bucket = Text::new("Bucket:")
        .with_default(&config.storage.bucket)
        .prompt()
        .context("Failed to read bucket")?;

    config.run.failure_policy =
        Select::new("When a city fails:", vec![FailurePolicy::Strict, FailurePolicy::Lenient])
            .with_help_message("strict: write nothing; lenient: write the cities that succeeded")
            .prompt()
            .context("Failed to read failure policy")?;

    config.validate()?;
    config.save()?;

    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

fn print_record(r: &NormalizedRecord) {
    println!("{}, {}: {}", r.city, r.country, r.description);
    println!(
        "  Temperature: {:.1} °C (feels like {:.1} °C, min {:.1}, max {:.1})",
        r.temperature_c, r.feels_like_c, r.temp_min_c, r.temp_max_c
    );
    println!("  Humidity:    {}%", r.humidity_pct);
    println!("  Pressure:    {} hPa", r.pressure);
    println!("  Wind:        {:.1} m/s", r.wind_speed_mps);
    println!("  Observed:    {} (local)", r.time_of_record);
    println!("  Sunrise:     {}", r.sunrise_local);
    println!("  Sunset:      {}", r.sunset_local);
}
