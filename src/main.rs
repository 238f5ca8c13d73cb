//! Entry point for the stack-stats application.
//! Loads the run configuration and file index, builds tasks and runs them.

use clap::Parser;
use stack_stats::cli::Args;
use stack_stats::prelude::*;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

fn main() -> ExitCode {
    let args = Args::parse();
    stack_stats::logging::init(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Run aborted");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    ParallelConfig::new(args.threads).setup_global_pool()?;
    ParallelInfo::current().log();

    let mut config = StatsConfig::from_path(&args.app_config)?;
    if let Some(year) = args.year {
        config = config.with_year(year)?;
    }
    let index = FileIndex::from_path(&args.index)?;

    let registry = StatisticRegistry::standard()?;
    let products = Arc::new(make_products(&config, &index, &registry)?);
    let tasks = make_tasks(&config, &index, products)?;

    if args.dry_run {
        for task in tasks {
            let task = task?;
            let tile = task.tile_index.map_or_else(|| "region".to_string(), |t| t.to_string());
            println!(
                "{} {tile}: {} sources, {} observations",
                task.period,
                task.sources.len(),
                task.observation_count()
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let reader = index.reader();
    let decoder = index.mask_decoder();
    let collaborators = Collaborators {
        reader: &reader,
        decoder: &decoder,
    };
    let summary = run_tasks(tasks, &config, collaborators);

    for report in &summary.reports {
        let tile = report.tile_index.map_or_else(|| "region".to_string(), |t| t.to_string());
        match &report.outcome {
            Ok(paths) => {
                println!("Completed: {} {tile}", report.period);
                for path in paths {
                    println!("    {}", path.display());
                }
            }
            Err(e) => eprintln!("Failed: {} {tile}: {e}", report.period),
        }
    }
    println!(
        "{} tasks completed, {} failed",
        summary.succeeded(),
        summary.failed()
    );

    Ok(if summary.failed() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
