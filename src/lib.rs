//! hexlst: cloud masking, seasonal compositing and hexagon statistics for
//! ECOSTRESS land surface temperature.
//!
//! Raw LST rasters are paired with their cloud masks by acquisition time,
//! converted to degrees Celsius, cleared of clouds and outliers, reduced to a
//! per-region median composite and finally summarized on H3 hexagons.

pub mod types;
pub mod io;
pub mod core;
pub mod pipeline;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    GeoTransform, HexagonStatisticsRow, LstError, LstResult, MatchReport, RasterImage, TimestampedFilePair,
};

pub use io::{DateKeyedFileMatcher, RasterReader, RasterWriter};
pub use core::{CloudMaskingEngine, HexagonalAggregator, SeasonalCompositeBuilder};
pub use pipeline::{LstPipeline, PipelineParams, PipelineSummary};
