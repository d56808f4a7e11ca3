use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Real-valued raster sample (degrees Celsius after masking)
pub type LstReal = f64;

/// 2D raster data array (rows x cols)
pub type LstGrid = Array2<LstReal>;

/// Geospatial bounding box in raster coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Smallest box covering both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// North-up grids only; rotated grids are rejected by the resampler
    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0
    }

    /// Coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (row, col) position of a coordinate on a north-up grid
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.top_left_y) / self.pixel_height,
            (x - self.top_left_x) / self.pixel_width,
        )
    }

    /// Footprint of a grid of `shape` = (rows, cols)
    pub fn bounds(&self, shape: (usize, usize)) -> BoundingBox {
        let (rows, cols) = shape;
        let x0 = self.top_left_x;
        let x1 = self.top_left_x + cols as f64 * self.pixel_width;
        let y0 = self.top_left_y;
        let y1 = self.top_left_y + rows as f64 * self.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }
}

/// In-memory single-band raster with its spatial reference
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub data: LstGrid,
    pub geo_transform: GeoTransform,
    /// Projection as WKT; empty when the source carries none
    pub projection: String,
    pub no_data: Option<f64>,
}

impl RasterImage {
    pub fn new(data: LstGrid, geo_transform: GeoTransform, projection: String, no_data: Option<f64>) -> Self {
        Self {
            data,
            geo_transform,
            projection,
            no_data,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn bounds(&self) -> BoundingBox {
        self.geo_transform.bounds(self.shape())
    }

    /// A sample is valid when it is neither NaN nor the declared no-data value
    pub fn is_valid(&self, value: f64) -> bool {
        !value.is_nan() && self.no_data.map_or(true, |nd| value != nd)
    }

    /// Same transform and same shape
    pub fn same_grid(&self, other: &RasterImage) -> bool {
        self.shape() == other.shape() && self.geo_transform == other.geo_transform
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| self.is_valid(**v)).count()
    }
}

/// LST raster and cloud mask acquired at the same instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedFilePair {
    pub datetime_utc: DateTime<Utc>,
    pub lst_path: PathBuf,
    pub cloud_mask_path: PathBuf,
}

/// Outcome of pairing a region folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    pub pairs: Vec<TimestampedFilePair>,
    /// LST files whose timestamp has no cloud mask
    pub unmatched_lst: usize,
    /// Cloud masks whose timestamp has no LST file
    pub unmatched_cloud_masks: usize,
    /// Files of either kind whose name carries no valid timestamp
    pub unparseable: usize,
}

impl MatchReport {
    pub fn unmatched_total(&self) -> usize {
        self.unmatched_lst + self.unmatched_cloud_masks + self.unparseable
    }
}

/// Error types for LST processing
#[derive(Debug, thiserror::Error)]
pub enum LstError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot read raster {}: {}", .path.display(), .reason)]
    RasterRead { path: PathBuf, reason: String },

    #[error("No input data for {0}")]
    EmptyInput(String),

    #[error("Invalid hexagon resolution {0}, expected 0..=15")]
    InvalidResolution(u8),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for LST operations
pub type LstResult<T> = Result<T, LstError>;

/// One hexagon of the output layer with its per-raster statistics
#[derive(Debug, Clone, PartialEq)]
pub struct HexagonStatisticsRow {
    pub cell: h3o::CellIndex,
    /// Cell outline in longitude/latitude, closed ring
    pub boundary: geo::Polygon<f64>,
    /// Statistic label -> rounded mean, `None` when no valid pixel fell in the cell
    pub statistics: std::collections::BTreeMap<String, Option<f64>>,
}
