//! Splitting a run into independent tasks
//!
//! A task is one time period over one spatial extent: either a cell of the
//! storage grid, or the configured input region. Tasks are produced lazily,
//! one period at a time, so catalog queries for later periods only happen
//! once earlier tasks have been handed out.

use crate::config::{SourceSpec, StatsConfig};
use crate::dates::TimePeriod;
use crate::errors::{Result, StatsError};
use crate::geometry::{GeoBox, GridSpec, TileIndex};
use crate::products::ProductSet;
use crate::sources::{Catalog, SourceTile};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Data and masks of one configured source within a task
///
/// The bundle's position in [`Task::sources`] is the source tag of its
/// time slices.
#[derive(Debug, Clone)]
pub struct SourceBundle {
    pub spec: SourceSpec,
    pub data: SourceTile,
    /// One entry per mask in `spec.masks`; `None` where the catalog had none
    pub masks: Vec<Option<SourceTile>>,
}

/// One unit of work: a time period over one spatial extent
#[derive(Debug, Clone)]
pub struct Task {
    pub period: TimePeriod,
    /// Grid cell, absent for region tasks
    pub tile_index: Option<TileIndex>,
    pub sources: Vec<SourceBundle>,
    pub products: Arc<ProductSet>,
}

impl Task {
    /// Pixel grid of the task, taken from its first source
    ///
    /// # Errors
    ///
    /// Returns a data error if the task has no sources.
    pub fn geobox(&self) -> Result<&GeoBox> {
        self.sources
            .first()
            .map(|bundle| &bundle.data.geobox)
            .ok_or_else(|| StatsError::data(format!("task for {} has no sources", self.period)))
    }

    /// Total number of observation groups across all sources
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.sources.iter().map(|b| b.data.len()).sum()
    }

    /// Values available to output path templates
    #[must_use]
    pub fn template_context(&self) -> TemplateContext {
        TemplateContext {
            tile_index: self.tile_index,
            start_time: self.period.start,
            end_time: self.period.end,
        }
    }
}

/// Task attributes exposed to file path templates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateContext {
    pub tile_index: Option<TileIndex>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Lazily generate all tasks of a run
///
/// The region strategy is used when the configuration has an input region,
/// otherwise the grid strategy. Each item is either a task or the catalog
/// error that prevented building the tasks of one period.
///
/// # Errors
///
/// Returns a configuration error if the periods or the grid cannot be
/// derived from the configuration.
pub fn make_tasks<'a>(
    config: &'a StatsConfig,
    catalog: &'a dyn Catalog,
    products: Arc<ProductSet>,
) -> Result<Box<dyn Iterator<Item = Result<Task>> + Send + 'a>> {
    let periods = config.time_periods()?;

    if let Some(region) = &config.input_region {
        let crs = region.crs.as_deref().unwrap_or(&config.storage.crs);
        let geobox = GeoBox::from_bounds(&region.bounds(), config.storage.resolution, crs)?;
        let tasks = periods.into_iter().filter_map(move |period| {
            region_task(config, catalog, &geobox, period, Arc::clone(&products)).transpose()
        });
        return Ok(Box::new(tasks));
    }

    let grid = config
        .storage
        .grid_spec()
        .ok_or_else(|| StatsError::config("storage.tile_size is required for grid tasks"))?;
    let tasks = periods.into_iter().flat_map(move |period| {
        match grid_tasks(config, catalog, &grid, period, &products) {
            Ok(tasks) => tasks.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        }
    });
    Ok(Box::new(tasks))
}

/// Tasks of one period, one per grid cell holding data, in tile order
fn grid_tasks(
    config: &StatsConfig,
    catalog: &dyn Catalog,
    grid: &GridSpec,
    period: TimePeriod,
    products: &Arc<ProductSet>,
) -> Result<Vec<Task>> {
    info!(%period, "Making grid tasks");
    let mut cells: BTreeMap<TileIndex, Vec<SourceBundle>> = BTreeMap::new();

    for spec in &config.sources {
        let group_by = spec.group_by();
        let data = catalog.list_cells(&spec.product, &period, group_by, grid)?;
        let masks = spec
            .masks
            .iter()
            .map(|mask| catalog.list_cells(&mask.product, &period, group_by, grid))
            .collect::<Result<Vec<_>>>()?;

        for (tile_index, tile) in data {
            cells.entry(tile_index).or_default().push(SourceBundle {
                spec: spec.clone(),
                data: tile,
                masks: masks.iter().map(|m| m.get(&tile_index).cloned()).collect(),
            });
        }
    }

    debug!(%period, cells = cells.len(), "Grid cells with data");
    Ok(cells
        .into_iter()
        .map(|(tile_index, sources)| Task {
            period,
            tile_index: Some(tile_index),
            sources,
            products: Arc::clone(products),
        })
        .collect())
}

/// The single region task of one period, if any source has data in it
fn region_task(
    config: &StatsConfig,
    catalog: &dyn Catalog,
    geobox: &GeoBox,
    period: TimePeriod,
    products: Arc<ProductSet>,
) -> Result<Option<Task>> {
    info!(%period, "Making region task");
    let mut sources = Vec::new();

    for spec in &config.sources {
        let group_by = spec.group_by();
        let data = catalog.find_region(&spec.product, &period, group_by, geobox)?;
        if data.is_empty() {
            debug!(product = %spec.product, %period, "No observations in region");
            continue;
        }
        let masks = spec
            .masks
            .iter()
            .map(|mask| catalog.find_region(&mask.product, &period, group_by, geobox).map(Some))
            .collect::<Result<Vec<_>>>()?;
        sources.push(SourceBundle {
            spec: spec.clone(),
            data,
            masks,
        });
    }

    if sources.is_empty() {
        debug!(%period, "Skipping period without data");
        return Ok(None);
    }
    Ok(Some(Task {
        period,
        tile_index: None,
        sources,
        products,
    }))
}
