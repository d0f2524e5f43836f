#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Entry point: turns each city's raw incident and census files into one
//! per-unit feature table.
//!
//! Uses `indicatif-log-bridge` (via [`crime_census_cli_utils::init_logger`])
//! so log lines and progress bars share the terminal cleanly.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crime_census_cli_utils::IndicatifProgress;
use crime_census_features::UndefinedRatioPolicy;
use crime_census_pipeline::{PipelineOptions, run_all};
use crime_census_source::registry::{all_cities, select_cities};
use crime_census_source_models::CityDefinition;

#[derive(Parser)]
#[command(
    name = "crime_census",
    about = "Link crime incidents to census units and derive per-unit features"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding the raw incident and census files
    #[arg(long, default_value = "datasets")]
    input_dir: PathBuf,

    /// Directory receiving one `crime_census_<city>.geojson` per city
    #[arg(long, default_value = "crime_census")]
    output_dir: PathBuf,

    /// Comma-separated list of city ids to process (default: all)
    #[arg(long)]
    cities: Option<String>,

    /// Drop units with an undefined ratio instead of publishing it as null
    #[arg(long)]
    drop_undefined_ratios: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured cities
    ListCities,
}

impl Cli {
    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            policy: if self.drop_undefined_ratios {
                UndefinedRatioPolicy::DropRow
            } else {
                UndefinedRatioPolicy::Retain
            },
        }
    }
}

/// Splits a comma-separated id list, ignoring blanks.
fn parse_city_ids(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn print_cities(cities: &[CityDefinition]) {
    println!("{:<6} {:<12} {:<12} OUTPUT", "ID", "NAME", "WORKING CRS");
    println!("{}", "-".repeat(60));
    for city in cities {
        println!(
            "{:<6} {:<12} {:<12} {}",
            city.id,
            city.name,
            city.crs.working.to_string(),
            city.output_filename()
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crime_census_cli_utils::init_logger();
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::ListCities)) {
        print_cities(&all_cities()?);
        return Ok(());
    }

    let cities = match &cli.cities {
        Some(list) => select_cities(&parse_city_ids(list))?,
        None => all_cities()?,
    };
    let options = cli.options();

    log::info!(
        "Processing {} cities from {} into {} ({} undefined ratios)",
        cities.len(),
        options.input_dir.display(),
        options.output_dir.display(),
        options.policy,
    );

    let cities_bar = IndicatifProgress::cities_bar(&multi, cities.len() as u64);
    run_all(&cities, &options, cities_bar.as_ref(), &|city| {
        IndicatifProgress::match_bar(&multi, &city.id)
    })?;

    Ok(())
}
