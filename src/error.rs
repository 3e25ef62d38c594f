use crate::crs::Crs;
use thiserror::Error;

/// Failures raised by the join/aggregate pipeline itself.
///
/// Loader and output code wraps these in `anyhow` with file context; callers
/// that need to react to a specific kind can `downcast_ref::<PipelineError>()`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("malformed point #{index} ({name}): {reason}")]
    MalformedPoint {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("coordinate system mismatch: points are in {points}, polygons are in {polygons}")]
    CoordinateSystemMismatch { points: Crs, polygons: Crs },

    #[error("{count} point(s) fell outside every neighborhood")]
    UnmatchedPoints { count: usize },

    #[error("invalid colour '{0}': expected #rrggbb")]
    InvalidColor(String),

    #[error("unrecognised coordinate reference system '{0}'")]
    InvalidCrs(String),

    #[error("invalid palette: {0}")]
    InvalidPalette(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
