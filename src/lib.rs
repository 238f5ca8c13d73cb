//! stack_stats: temporal statistics over stacks of gridded raster observations
//!
//! Given a multi-band, multi-date stack of observations on a spatial grid,
//! stack_stats computes per-pixel summaries through time (mean, min, max,
//! percentiles, medoid, normalised-difference indices, water observation
//! frequency) and writes them as new raster products tiled in space and
//! time.
//!
//! ## Key Features
//!
//! - **Provenance**: percentile and medoid outputs record which observation
//!   and which source each pixel came from
//! - **Bounded memory**: every task is split into chunks that are loaded,
//!   computed and flushed one at a time, in parallel
//! - **Pluggable output**: NetCDF (one file per product) or GeoTIFF (one
//!   file per variable)
//! - **Masking**: bit-flag quality bands applied per source
//!
//! ## Module Organization
//!
//! - [`config`]: YAML run configuration and validation
//! - [`statistics`]: statistic kinds, index selection and the registry
//! - [`products`]: output products resolved from configuration
//! - [`tasks`]: lazy task generation over grid cells or a region
//! - [`loader`]: merging and masking source data for one chunk
//! - [`output`]: output drivers and path templates
//! - [`orchestrator`]: running tasks chunk by chunk
//! - [`sources`]: catalog, reader and mask decoder interfaces
//! - [`file_index`], [`netcdf_io`], [`masking`]: file-based implementations
//!   of those interfaces
//! - [`dates`], [`geometry`], [`model`]: periods, grids and data containers
//! - [`parallel`], [`logging`], [`errors`]: runtime support
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stack_stats::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let config = StatsConfig::from_path(Path::new("run.yaml")).unwrap();
//! let index = FileIndex::from_path(Path::new("index.yaml")).unwrap();
//! let registry = StatisticRegistry::standard().unwrap();
//!
//! let products = Arc::new(make_products(&config, &index, &registry).unwrap());
//! let tasks = make_tasks(&config, &index, products).unwrap();
//!
//! let reader = index.reader();
//! let decoder = index.mask_decoder();
//! let summary = run_tasks(tasks, &config, Collaborators { reader: &reader, decoder: &decoder });
//! println!("{} tasks completed", summary.succeeded());
//! ```

pub mod cli;
pub mod config;
pub mod dates;
pub mod errors;
pub mod file_index;
pub mod geometry;
pub mod loader;
pub mod logging;
pub mod masking;
pub mod model;
pub mod netcdf_io;
pub mod orchestrator;
pub mod output;
pub mod parallel;
pub mod products;
pub mod sources;
pub mod statistics;
pub mod tasks;

pub use errors::*;

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::config::StatsConfig;
    pub use crate::errors::{ErrorKind, Result, StatsError};
    pub use crate::file_index::FileIndex;
    pub use crate::model::{DType, Measurement, OutputVolume, Volume};
    pub use crate::orchestrator::{process_task, run_tasks, Collaborators, RunSummary, TaskReport};
    pub use crate::output::{create_driver, OutputDriver};
    pub use crate::parallel::{ParallelConfig, ParallelInfo};
    pub use crate::products::{make_products, OutputProduct, ProductSet};
    pub use crate::sources::{Catalog, MaskDecoder, RasterReader};
    pub use crate::statistics::{Statistic, StatisticRegistry};
    pub use crate::tasks::{make_tasks, Task};
}
