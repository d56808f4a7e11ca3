use crate::types::{GeoTransform, LstError, LstResult, RasterImage};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Single-band GeoTIFF reader
pub struct RasterReader;

impl RasterReader {
    /// Read band 1 of a raster together with its geotransform, projection and no-data value.
    ///
    /// Any failure to open or decode the file is reported as `RasterRead`
    /// carrying the offending path.
    pub fn read<P: AsRef<Path>>(path: P) -> LstResult<RasterImage> {
        let path = path.as_ref();
        log::debug!("Reading raster from: {}", path.display());

        Self::read_inner(path).map_err(|e| match e {
            LstError::RasterRead { .. } => e,
            other => LstError::RasterRead {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }

    fn read_inner(path: &Path) -> LstResult<RasterImage> {
        let dataset = Dataset::open(path)?;

        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("Raster size: {}x{}", width, height);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| LstError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        Ok(RasterImage::new(
            data,
            GeoTransform::from_gdal(geo_transform),
            dataset.projection(),
            no_data,
        ))
    }
}

/// Single-band Float64 GeoTIFF writer
pub struct RasterWriter;

impl RasterWriter {
    /// Write a raster as GeoTIFF; a missing no-data value is written as NaN
    pub fn write_geotiff<P: AsRef<Path>>(image: &RasterImage, output_path: P) -> LstResult<()> {
        log::debug!("Saving raster as GeoTIFF: {}", output_path.as_ref().display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = image.shape();

        let mut dataset = driver.create_with_band_type::<f64, _>(
            output_path.as_ref(),
            width as isize,
            height as isize,
            1,
        )?;

        dataset.set_geo_transform(&image.geo_transform.to_gdal())?;
        if !image.projection.is_empty() {
            dataset.set_projection(&image.projection)?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<f64> = image.data.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(image.no_data.unwrap_or(f64::NAN)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geotiff_write_read_preserves_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");

        let mut data = Array2::from_elem((4, 6), 12.5);
        data[[1, 2]] = f64::NAN;
        let gt = GeoTransform::from_gdal([13.0, 0.001, 0.0, 47.8, 0.0, -0.001]);
        let image = RasterImage::new(data, gt, String::new(), None);

        RasterWriter::write_geotiff(&image, &path).unwrap();
        let back = RasterReader::read(&path).unwrap();

        assert_eq!(back.shape(), (4, 6));
        assert_eq!(back.geo_transform, gt);
        assert!(back.data[[1, 2]].is_nan());
        assert_eq!(back.data[[3, 5]], 12.5);
        assert!(back.no_data.map_or(false, |v| v.is_nan()));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = RasterReader::read("/nonexistent/dir/ECO_LST.tif").unwrap_err();
        match err {
            LstError::RasterRead { path, .. } => {
                assert!(path.ends_with("ECO_LST.tif"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
