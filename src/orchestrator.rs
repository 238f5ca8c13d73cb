//! Running tasks: chunked load, compute and write
//!
//! [`process_task`] handles one task end to end. Its chunks run in parallel
//! and share the task's output driver behind a mutex. [`run_tasks`] runs
//! every task of a run, also in parallel, and reports each outcome without
//! letting one failure stop the others.

use crate::config::StatsConfig;
use crate::dates::TimePeriod;
use crate::errors::{Result, StatsError};
use crate::geometry::{chunk_windows, ChunkWindow, TileIndex};
use crate::loader::load_data;
use crate::model::Volume;
use crate::output::{create_driver, OutputDriver};
use crate::sources::{MaskDecoder, RasterReader};
use crate::tasks::Task;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Raster decoding and mask decoding shared by all tasks
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub reader: &'a dyn RasterReader,
    pub decoder: &'a dyn MaskDecoder,
}

/// Outcome of one task
#[derive(Debug)]
pub struct TaskReport {
    pub period: TimePeriod,
    pub tile_index: Option<TileIndex>,
    /// Files written, or the first error of the task
    pub outcome: Result<Vec<PathBuf>>,
}

impl TaskReport {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcomes of a whole run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Sorted by period, then tile
    pub reports: Vec<TaskReport>,
    /// Errors that prevented tasks of a period from being built
    pub planning_errors: Vec<StatsError>,
}

impl RunSummary {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded() + self.planning_errors.len()
    }
}

/// Compute and write every output product of one task
///
/// The driver is opened before any data is loaded, so storage problems
/// abort the task early. It is closed on every path; the first error wins.
///
/// # Errors
///
/// Returns the first configuration, data, compute or I/O error of the task.
pub fn process_task(task: &Task, config: &StatsConfig, collaborators: Collaborators<'_>) -> Result<Vec<PathBuf>> {
    let mut driver = create_driver(&config.storage, &config.location);
    if let Err(e) = driver.open(task) {
        if let Err(close_error) = driver.close() {
            warn!(period = %task.period, error = %close_error, "Failed to release outputs after open failed");
        }
        return Err(e);
    }

    let computed = compute_chunks(task, config, collaborators, driver.as_mut());
    let closed = driver.close();
    computed?;
    closed?;
    Ok(driver.output_paths())
}

fn compute_chunks(
    task: &Task,
    config: &StatsConfig,
    collaborators: Collaborators<'_>,
    driver: &mut dyn OutputDriver,
) -> Result<()> {
    let (height, width) = task.geobox()?.shape();
    let bands = task.sources.first().map_or(1, |b| b.spec.measurements.len());
    let chunk = config.computation.chunk_size(task.observation_count(), bands);
    let windows = chunk_windows(height, width, chunk)?;
    debug!(
        period = %task.period,
        chunks = windows.len(),
        chunk_x = chunk.x,
        chunk_y = chunk.y,
        "Planned chunks"
    );

    let driver = Mutex::new(driver);
    windows
        .par_iter()
        .try_for_each(|window| process_chunk(task, window, collaborators, &driver))
}

fn load_if(needed: bool, masked: bool, task: &Task, window: &ChunkWindow, c: Collaborators<'_>) -> Result<Option<Volume>> {
    needed
        .then(|| load_data(window, &task.sources, masked, c.reader, c.decoder))
        .transpose()
}

fn process_chunk(
    task: &Task,
    window: &ChunkWindow,
    collaborators: Collaborators<'_>,
    driver: &Mutex<&mut dyn OutputDriver>,
) -> Result<()> {
    let products = &task.products;
    let masked = load_if(products.needs_masked(), true, task, window, collaborators)?;
    let unmasked = load_if(products.needs_unmasked(), false, task, window, collaborators)?;

    for product in products.iter() {
        let wants_masked = product.statistic.masked();
        let data = if wants_masked { &masked } else { &unmasked };
        let data = data
            .as_ref()
            .ok_or_else(|| StatsError::compute(format!("no input loaded for '{}'", product.name)))?;
        if data.is_masked() != wants_masked {
            return Err(StatsError::compute(format!(
                "statistic of '{}' expects masked={wants_masked} input",
                product.name
            )));
        }

        debug!(product = %product.name, %window, observations = data.len(), "Computing");
        let output = product.statistic.compute(data)?;

        let mut driver = driver.lock();
        for (variable, values) in output.iter() {
            if product.measurement(variable).is_none() {
                trace!(product = %product.name, %variable, "Skipping excluded variable");
                continue;
            }
            driver.write(&product.name, variable, window, values)?;
        }
    }
    Ok(())
}

/// Run every task, reporting each outcome
///
/// Tasks run in parallel on the global rayon pool. A failed task is logged
/// and reported; the remaining tasks still run.
pub fn run_tasks<I>(tasks: I, config: &StatsConfig, collaborators: Collaborators<'_>) -> RunSummary
where
    I: Iterator<Item = Result<Task>> + Send,
{
    let outcomes: Vec<Result<TaskReport>> = tasks
        .par_bridge()
        .map(|task| task.map(|task| run_one(&task, config, collaborators)))
        .collect();

    let mut summary = RunSummary::default();
    for outcome in outcomes {
        match outcome {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                error!(error = %e, "Failed to build tasks");
                summary.planning_errors.push(e);
            }
        }
    }
    summary.reports.sort_by_key(|r| (r.period, r.tile_index));
    summary
}

fn run_one(task: &Task, config: &StatsConfig, collaborators: Collaborators<'_>) -> TaskReport {
    let started = Instant::now();
    let tile = task.tile_index.map(|t| t.to_string()).unwrap_or_else(|| "region".to_string());
    info!(period = %task.period, %tile, sources = task.sources.len(), "Starting task");

    let outcome = process_task(task, config, collaborators);
    match &outcome {
        Ok(paths) => info!(
            period = %task.period,
            %tile,
            files = paths.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completed task"
        ),
        Err(e) => error!(period = %task.period, %tile, error = %e, "Task failed"),
    }

    TaskReport {
        period: task.period,
        tile_index: task.tile_index,
        outcome,
    }
}
