//! Command-line options

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Compute temporal statistics over stacks of gridded observations
#[derive(Parser, Debug)]
#[command(
    version,
    name = "stack-stats",
    about = "Compute temporal statistics over stacks of gridded raster observations"
)]
pub struct Args {
    /// Run configuration (YAML)
    #[arg(short = 'c', long = "app-config")]
    pub app_config: PathBuf,

    /// Dataset file index (YAML)
    #[arg(short, long)]
    pub index: PathBuf,

    /// Only process this calendar year
    #[arg(long, value_parser = clap::value_parser!(i32).range(1960..=2060))]
    pub year: Option<i32>,

    /// Number of threads to use for parallel processing. Defaults to number of CPU cores.
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// List the tasks that would run, without loading data or writing files
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (-v, -vv, -vvv); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
