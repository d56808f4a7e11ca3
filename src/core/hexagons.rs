use crate::core::statistics::round_to;
use crate::io::RasterReader;
use crate::types::{GeoTransform, HexagonStatisticsRow, LstError, LstResult, RasterImage};
use geo::{BoundingRect, Contains, Coord, LineString, Point, Polygon, Rect};
use h3o::geom::{PolyfillConfig, ToCells};
use h3o::{CellIndex, Resolution};
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Hierarchical hexagonal grid seen by the aggregator
pub trait HexGrid {
    /// Cells whose centroid lies inside `polygon` (longitude/latitude), sorted by index
    fn cells_covering_polygon(&self, polygon: &Polygon<f64>, resolution: Resolution) -> LstResult<Vec<CellIndex>>;

    /// Cell outline as a closed longitude/latitude ring
    fn cell_boundary(&self, cell: CellIndex) -> Polygon<f64>;
}

/// H3 grid backed by `h3o`.
///
/// Polygon fill uses h3o's polyfill in its default centroid containment mode:
/// a cell belongs to the polygon when its centre lies inside it.
#[derive(Debug, Clone, Copy, Default)]
pub struct H3Grid;

impl HexGrid for H3Grid {
    fn cells_covering_polygon(&self, polygon: &Polygon<f64>, resolution: Resolution) -> LstResult<Vec<CellIndex>> {
        let h3_polygon = h3o::geom::Polygon::from_degrees(polygon.clone())
            .map_err(|e| LstError::InvalidFormat(format!("Invalid AOI polygon: {}", e)))?;

        let mut cells: Vec<CellIndex> = h3_polygon.to_cells(PolyfillConfig::new(resolution)).collect();
        cells.sort_unstable();
        cells.dedup();

        log::debug!("{} cells at resolution {} inside the AOI", cells.len(), resolution);
        Ok(cells)
    }

    fn cell_boundary(&self, cell: CellIndex) -> Polygon<f64> {
        let coords: Vec<Coord<f64>> = cell
            .boundary()
            .iter()
            .map(|ll| Coord { x: ll.lng(), y: ll.lat() })
            .collect();
        // Polygon::new closes the ring
        Polygon::new(LineString::from(coords), vec![])
    }
}

/// Hexagon aggregation parameters
#[derive(Debug, Clone)]
pub struct HexagonParams {
    /// H3 resolution, 0 (continental) to 15 (sub-metre)
    pub resolution: u8,
    /// Value treated as no-data in addition to the raster's own sentinel
    pub no_data_override: Option<f64>,
    /// Prefix of the statistic labels
    pub label_prefix: String,
    /// Decimal places kept in the statistics
    pub decimals: u32,
    /// Suffix selecting rasters when aggregating a folder
    pub raster_suffix: String,
}

impl Default for HexagonParams {
    fn default() -> Self {
        Self {
            resolution: 9,
            no_data_override: None,
            label_prefix: "s_mean_".to_string(),
            decimals: 3,
            raster_suffix: "_cog.tif".to_string(),
        }
    }
}

/// Reject resolutions outside 0..=15 before any work is done
pub fn validate_resolution(resolution: u8) -> LstResult<Resolution> {
    Resolution::try_from(resolution).map_err(|_| LstError::InvalidResolution(resolution))
}

/// Row/column ranges of the pixels that may have their centre inside `rect`
fn pixel_window(gt: &GeoTransform, shape: (usize, usize), rect: &Rect<f64>) -> Option<(Range<usize>, Range<usize>)> {
    let (rows, cols) = shape;
    let (r_a, c_a) = gt.to_pixel(rect.min().x, rect.min().y);
    let (r_b, c_b) = gt.to_pixel(rect.max().x, rect.max().y);

    let clamp = |lo: f64, hi: f64, n: usize| -> Option<Range<usize>> {
        let start = lo.floor().max(0.0);
        let end = (hi.ceil() + 1.0).min(n as f64);
        if start >= end {
            None
        } else {
            Some(start as usize..end as usize)
        }
    };

    Some((
        clamp(r_a.min(r_b), r_a.max(r_b), rows)?,
        clamp(c_a.min(c_b), c_a.max(c_b), cols)?,
    ))
}

/// Mean of the valid pixels whose centre lies inside `zone`.
///
/// `None` when no pixel centre falls in the zone or all of them are no-data.
pub fn zonal_mean(raster: &RasterImage, zone: &Polygon<f64>, no_data_override: Option<f64>) -> Option<f64> {
    let rect = zone.bounding_rect()?;
    let (rows, cols) = pixel_window(&raster.geo_transform, raster.shape(), &rect)?;

    let mut sum = 0.0;
    let mut count = 0usize;
    for row in rows {
        for col in cols.clone() {
            let value = raster.data[[row, col]];
            if !raster.is_valid(value) || no_data_override == Some(value) {
                continue;
            }
            let (x, y) = raster.geo_transform.pixel_center(row, col);
            if zone.contains(&Point::new(x, y)) {
                sum += value;
                count += 1;
            }
        }
    }

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Summarizes rasters on the H3 cells covering an area of interest
pub struct HexagonalAggregator<G: HexGrid = H3Grid> {
    grid: G,
    params: HexagonParams,
    resolution: Resolution,
    year_pattern: Regex,
}

impl HexagonalAggregator<H3Grid> {
    /// Aggregator on the H3 grid; fails on an invalid resolution
    pub fn new(params: HexagonParams) -> LstResult<Self> {
        Self::with_grid(H3Grid, params)
    }
}

impl<G: HexGrid + Sync> HexagonalAggregator<G> {
    pub fn with_grid(grid: G, params: HexagonParams) -> LstResult<Self> {
        let resolution = validate_resolution(params.resolution)?;
        let year_pattern = Regex::new(r"\d{4}")
            .map_err(|e| LstError::Processing(format!("Invalid label pattern: {}", e)))?;
        Ok(Self {
            grid,
            params,
            resolution,
            year_pattern,
        })
    }

    pub fn params(&self) -> &HexagonParams {
        &self.params
    }

    /// Cells covering the AOI with their outlines and no statistics, sorted by index
    pub fn tessellate(&self, aoi: &Polygon<f64>) -> LstResult<Vec<HexagonStatisticsRow>> {
        let cells = self.grid.cells_covering_polygon(aoi, self.resolution)?;
        log::info!("Generated {} hexagons at resolution {}", cells.len(), self.params.resolution);

        Ok(cells
            .into_iter()
            .map(|cell| HexagonStatisticsRow {
                cell,
                boundary: self.grid.cell_boundary(cell),
                statistics: BTreeMap::new(),
            })
            .collect())
    }

    /// Zonal means of every labelled raster on the AOI hexagons.
    ///
    /// Each raster contributes one statistic column; values are rounded to the
    /// configured number of decimals.
    pub fn aggregate(&self, aoi: &Polygon<f64>, rasters: &[(String, RasterImage)]) -> LstResult<Vec<HexagonStatisticsRow>> {
        for (label, raster) in rasters {
            if !raster.geo_transform.is_north_up() {
                return Err(LstError::GridMismatch(format!("raster '{}' has a rotated geotransform", label)));
            }
        }

        let mut rows = self.tessellate(aoi)?;
        let columns = self.compute_columns(&rows, rasters);

        for ((label, _), column) in rasters.iter().zip(columns) {
            for (row, value) in rows.iter_mut().zip(column) {
                row.statistics.insert(label.clone(), value);
            }
        }
        Ok(rows)
    }

    fn column_for(&self, rows: &[HexagonStatisticsRow], raster: &RasterImage) -> Vec<Option<f64>> {
        rows.iter()
            .map(|row| {
                zonal_mean(raster, &row.boundary, self.params.no_data_override)
                    .map(|mean| round_to(mean, self.params.decimals))
            })
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn compute_columns(&self, rows: &[HexagonStatisticsRow], rasters: &[(String, RasterImage)]) -> Vec<Vec<Option<f64>>> {
        use rayon::prelude::*;
        rasters
            .par_iter()
            .map(|(_, raster)| self.column_for(rows, raster))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn compute_columns(&self, rows: &[HexagonStatisticsRow], rasters: &[(String, RasterImage)]) -> Vec<Vec<Option<f64>>> {
        rasters
            .iter()
            .map(|(_, raster)| self.column_for(rows, raster))
            .collect()
    }

    /// Statistic label for a raster file: prefix + two-digit year, taken from
    /// the last 4-digit group of the stem (`Median_Salzburg_2023_Masked_cog`
    /// gives `s_mean_23`), or prefix + stem when there is none
    pub fn label_for(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let token = self
            .year_pattern
            .find_iter(&stem)
            .last()
            .map(|m| m.as_str()[2..].to_string())
            .unwrap_or_else(|| stem.clone());
        format!("{}{}", self.params.label_prefix, token)
    }

    /// Rasters of a folder selected by suffix, sorted by name
    pub fn list_rasters(&self, folder: &Path) -> LstResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let path = entry?.path();
            let selected = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(&self.params.raster_suffix));
            if path.is_file() && selected {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Aggregate every selected raster of a folder.
    ///
    /// Unreadable rasters are logged and left out; duplicate labels fall back
    /// to the full file stem.
    pub fn aggregate_folder<P: AsRef<Path>>(&self, folder: P, aoi: &Polygon<f64>) -> LstResult<Vec<HexagonStatisticsRow>> {
        let folder = folder.as_ref();
        let files = self.list_rasters(folder)?;
        if files.is_empty() {
            return Err(LstError::EmptyInput(format!(
                "no '*{}' rasters in {}",
                self.params.raster_suffix,
                folder.display()
            )));
        }

        let mut rasters: Vec<(String, RasterImage)> = Vec::new();
        for path in &files {
            let raster = match RasterReader::read(path) {
                Ok(raster) => raster,
                Err(e) => {
                    log::error!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let mut label = self.label_for(path);
            if rasters.iter().any(|(existing, _)| *existing == label) {
                let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
                label = format!("{}{}", self.params.label_prefix, stem);
            }
            rasters.push((label, raster));
        }

        if rasters.is_empty() {
            return Err(LstError::EmptyInput(format!("no readable rasters in {}", folder.display())));
        }
        self.aggregate(aoi, &rasters)
    }
}
