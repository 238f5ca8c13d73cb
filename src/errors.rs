//! Centralized error handling for stack_stats
//!
//! Every fallible operation in the crate returns [`Result`]. Each variant of
//! [`StatsError`] belongs to one [`ErrorKind`], which decides how far a
//! failure propagates: configuration errors abort the whole run before any
//! data is touched, the other kinds only fail the task they occur in.

/// Broad classification of a [`StatsError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or inconsistent user declarations
    Configuration,
    /// A required band or source could not be loaded
    Data,
    /// A statistic failed on malformed input
    Compute,
    /// Output sink or file system failure
    Io,
}

/// Main error type for stack_stats operations
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Statistic name not present in the registry
    #[error("Configuration error: unknown statistic '{name}'")]
    UnknownStatistic { name: String },

    /// A statistic references a band the input measurements do not provide
    #[error("Configuration error: input measurements for '{statistic}' must include '{band}'")]
    MissingBand { statistic: String, band: String },

    /// Configuration document could not be parsed
    #[error("Configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Required data could not be loaded
    #[error("Data error: {0}")]
    Data(String),

    /// A band is absent from a loaded source
    #[error("Data error: band '{band}' not found in {source_name}")]
    BandNotFound { band: String, source_name: String },

    /// Statistics computation errors
    #[error("Statistics computation error: {0}")]
    Compute(String),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDFError(#[from] netcdf::Error),

    /// GeoTIFF encoding errors
    #[error("TIFF error: {0}")]
    TiffError(#[from] tiff::TiffError),

    /// Output sink used in the wrong state or with an unknown target
    #[error("Output error: {0}")]
    Output(String),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),
}

impl StatsError {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_)
            | Self::UnknownStatistic { .. }
            | Self::MissingBand { .. }
            | Self::Yaml(_)
            | Self::ThreadPoolError(_) => ErrorKind::Configuration,
            Self::Data(_) | Self::BandNotFound { .. } => ErrorKind::Data,
            Self::Compute(_) | Self::ArrayError(_) => ErrorKind::Compute,
            Self::IoError(_) | Self::NetCDFError(_) | Self::TiffError(_) | Self::Output(_) => {
                ErrorKind::Io
            }
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub(crate) fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }
}

/// Result type alias for stack_stats operations
pub type Result<T> = std::result::Result<T, StatsError>;
