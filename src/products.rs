//! Output products resolved from configuration
//!
//! An output product pairs a configured definition with the statistic it
//! names and the output variables that statistic produces for the run's
//! input measurements, after exclusions and dtype overrides.

use crate::config::{OutputProductDef, StatsConfig};
use crate::errors::{Result, StatsError};
use crate::model::Measurement;
use crate::sources::Catalog;
use crate::statistics::{Statistic, StatisticRegistry};
use tracing::debug;

/// Default NetCDF deflate level
pub const DEFAULT_COMPLEVEL: i32 = 4;

/// A fully resolved output product
#[derive(Debug, Clone)]
pub struct OutputProduct {
    pub name: String,
    pub statistic: Statistic,
    pub definition: OutputProductDef,
    /// Output variables written for this product, in statistic order
    pub measurements: Vec<Measurement>,
}

impl OutputProduct {
    #[must_use]
    pub fn measurement(&self, variable: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.name == variable)
    }

    /// Deflate level, or `None` when compression is disabled
    #[must_use]
    pub fn compression(&self) -> Option<i32> {
        if self.definition.zlib.unwrap_or(true) {
            Some(self.definition.complevel.unwrap_or(DEFAULT_COMPLEVEL).clamp(0, 9))
        } else {
            None
        }
    }

    #[must_use]
    pub fn shuffle(&self) -> bool {
        self.definition.shuffle.unwrap_or(true)
    }
}

/// The output products of a run, in configuration order
#[derive(Debug, Clone, Default)]
pub struct ProductSet {
    products: Vec<OutputProduct>,
}

impl ProductSet {
    /// # Errors
    ///
    /// Returns a configuration error if two products share a name.
    pub fn new(products: Vec<OutputProduct>) -> Result<Self> {
        for (i, product) in products.iter().enumerate() {
            if products[..i].iter().any(|p| p.name == product.name) {
                return Err(StatsError::config(format!(
                    "Output products must all have different names. Duplicate: '{}'",
                    product.name
                )));
            }
        }
        Ok(Self { products })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OutputProduct> {
        self.products.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputProduct> {
        self.products.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Whether any product needs data with no-data values masked out
    #[must_use]
    pub fn needs_masked(&self) -> bool {
        self.products.iter().any(|p| p.statistic.masked())
    }

    /// Whether any product needs raw, unmasked data
    #[must_use]
    pub fn needs_unmasked(&self) -> bool {
        self.products.iter().any(|p| !p.statistic.masked())
    }
}

/// Declarations of the measurements listed for the sources
///
/// Every source must list the same measurements, and the catalog must
/// describe each of them identically for every source product.
///
/// # Errors
///
/// Returns a configuration error on inconsistency or an unknown measurement.
pub fn source_measurements(config: &StatsConfig, catalog: &dyn Catalog) -> Result<Vec<Measurement>> {
    let mut resolved: Option<Vec<Measurement>> = None;

    for source in &config.sources {
        let available = catalog.measurements(&source.product)?;
        let listed = source
            .measurements
            .iter()
            .map(|name| {
                available
                    .iter()
                    .find(|m| &m.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        StatsError::config(format!(
                            "product '{}' has no measurement '{name}'",
                            source.product
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        match &resolved {
            Some(first) if *first != listed => {
                return Err(StatsError::config(
                    "Source products do not have consistent measurements",
                ));
            }
            Some(_) => {}
            None => resolved = Some(listed),
        }
    }

    resolved.ok_or_else(|| StatsError::config("at least one source is required"))
}

/// Apply a product's exclusions and dtype overrides to the statistic outputs
fn finalise_measurements(def: &OutputProductDef, produced: Vec<Measurement>) -> Result<Vec<Measurement>> {
    let unknown = def
        .exclude_variables
        .iter()
        .chain(def.dtype_overrides.keys())
        .find(|name| !produced.iter().any(|m| &&m.name == name));
    if let Some(name) = unknown {
        return Err(StatsError::config(format!(
            "output product '{}' refers to variable '{name}' which statistic '{}' does not produce",
            def.name, def.statistic
        )));
    }

    Ok(produced
        .into_iter()
        .filter(|m| !def.exclude_variables.contains(&m.name))
        .map(|mut m| {
            if let Some(&dtype) = def.dtype_overrides.get(&m.name) {
                m.dtype = dtype;
            }
            m
        })
        .collect())
}

/// Resolve every configured output product against the registry
///
/// # Errors
///
/// Returns a configuration error for duplicate names, unknown statistics,
/// inconsistent sources or bands a statistic requires but the sources lack.
pub fn make_products(
    config: &StatsConfig,
    catalog: &dyn Catalog,
    registry: &StatisticRegistry,
) -> Result<ProductSet> {
    let input = source_measurements(config, catalog)?;

    let products = config
        .output_products
        .iter()
        .map(|def| {
            let statistic = registry.get(&def.statistic)?.clone();
            let measurements = finalise_measurements(def, statistic.measurements(&input)?)?;
            debug!(
                product = %def.name,
                statistic = %def.statistic,
                kind = statistic.kind(),
                variables = measurements.len(),
                "Resolved output product"
            );
            Ok(OutputProduct {
                name: def.name.clone(),
                statistic,
                definition: def.clone(),
                measurements,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    ProductSet::new(products)
}
