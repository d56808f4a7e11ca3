//! Core LST processing modules

pub mod statistics;
pub mod resample;
pub mod cloud_mask;
pub mod composite;
pub mod hexagons;

// Re-export main types
pub use cloud_mask::{CloudMaskingEngine, MaskingParams, MaskingReport, PairOutcome};
pub use composite::{SeasonalCompositeBuilder, CompositeParams};
pub use hexagons::{HexagonalAggregator, HexagonParams, HexGrid, H3Grid, zonal_mean, validate_resolution};
pub use resample::{reproject_match, merge_grid};
