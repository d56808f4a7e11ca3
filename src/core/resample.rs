//! Grid reconciliation: nearest-neighbour reproject-match and footprint merge.
//!
//! Both operations work on north-up grids sharing one coordinate reference
//! system. Samples outside the source footprint, and source no-data samples,
//! become NaN on the target grid.

use crate::types::{GeoTransform, LstError, LstResult, RasterImage};
use ndarray::Array2;

/// Check that two rasters can be combined without a map projection
fn ensure_compatible(source: &RasterImage, target: &RasterImage) -> LstResult<()> {
    if !source.geo_transform.is_north_up() || !target.geo_transform.is_north_up() {
        return Err(LstError::GridMismatch("rotated geotransforms are not supported".to_string()));
    }
    if !source.projection.is_empty()
        && !target.projection.is_empty()
        && source.projection != target.projection
    {
        return Err(LstError::GridMismatch(
            "rasters use different coordinate reference systems".to_string(),
        ));
    }
    Ok(())
}

/// Resample `source` onto the exact grid of `target` (same transform, same shape)
pub fn reproject_match(source: &RasterImage, target: &RasterImage) -> LstResult<RasterImage> {
    ensure_compatible(source, target)?;

    if source.same_grid(target) {
        let data = source.data.mapv(|v| if source.is_valid(v) { v } else { f64::NAN });
        return Ok(RasterImage::new(
            data,
            target.geo_transform,
            target.projection.clone(),
            Some(f64::NAN),
        ));
    }

    let (target_height, target_width) = target.shape();
    let (source_height, source_width) = source.shape();
    log::debug!(
        "Resampling {}x{} grid onto {}x{} grid",
        source_height,
        source_width,
        target_height,
        target_width
    );

    let mut resampled = Array2::from_elem((target_height, target_width), f64::NAN);
    let src_gt = &source.geo_transform;

    for i in 0..target_height {
        for j in 0..target_width {
            let (x, y) = target.geo_transform.pixel_center(i, j);
            let (row, col) = src_gt.to_pixel(x, y);
            if row < 0.0 || col < 0.0 {
                continue;
            }
            let (row, col) = (row.floor() as usize, col.floor() as usize);
            if row < source_height && col < source_width {
                let value = source.data[[row, col]];
                if source.is_valid(value) {
                    resampled[[i, j]] = value;
                }
            }
        }
    }

    Ok(RasterImage::new(
        resampled,
        target.geo_transform,
        target.projection.clone(),
        Some(f64::NAN),
    ))
}

/// Reference grid covering the union of all footprints at the first raster's resolution.
///
/// The returned raster carries only the grid; its samples are NaN.
pub fn merge_grid(rasters: &[RasterImage]) -> LstResult<RasterImage> {
    let first = rasters
        .first()
        .ok_or_else(|| LstError::EmptyInput("grid merge".to_string()))?;

    let mut bounds = first.bounds();
    for raster in &rasters[1..] {
        ensure_compatible(raster, first)?;
        bounds = bounds.union(&raster.bounds());
    }

    let gt = &first.geo_transform;
    let res_x = gt.pixel_width.abs();
    let res_y = gt.pixel_height.abs();
    let width = ((bounds.max_x - bounds.min_x) / res_x).round().max(1.0) as usize;
    let height = ((bounds.max_y - bounds.min_y) / res_y).round().max(1.0) as usize;

    let top_left_x = if gt.pixel_width > 0.0 { bounds.min_x } else { bounds.max_x };
    let top_left_y = if gt.pixel_height < 0.0 { bounds.max_y } else { bounds.min_y };

    let geo_transform = GeoTransform {
        top_left_x,
        pixel_width: gt.pixel_width,
        rotation_x: 0.0,
        top_left_y,
        rotation_y: 0.0,
        pixel_height: gt.pixel_height,
    };
    log::debug!("Merged grid: {}x{} {:?}", height, width, geo_transform);

    Ok(RasterImage::new(
        Array2::from_elem((height, width), f64::NAN),
        geo_transform,
        first.projection.clone(),
        Some(f64::NAN),
    ))
}
