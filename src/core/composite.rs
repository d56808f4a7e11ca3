use crate::core::resample::{merge_grid, reproject_match};
use crate::core::statistics::nan_median;
use crate::io::{RasterReader, RasterWriter};
use crate::types::{LstError, LstResult, RasterImage};
use ndarray::{Array2, Axis};
use std::path::{Path, PathBuf};

/// Seasonal compositing parameters
#[derive(Debug, Clone)]
pub struct CompositeParams {
    /// Folder receiving one `Median_<region>.tif` per region
    pub output_dir: PathBuf,
    /// Suffix selecting cleaned rasters inside a masked folder
    pub input_suffix: String,
    /// Treat exact 0.0 in the composite as no-data
    pub zero_as_no_data: bool,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("Summer Median Composites"),
            input_suffix: "_LST.tif".to_string(),
            zero_as_no_data: true,
        }
    }
}

/// Builds per-pixel median composites from cleaned LST rasters
pub struct SeasonalCompositeBuilder {
    params: CompositeParams,
}

impl SeasonalCompositeBuilder {
    pub fn new() -> Self {
        Self {
            params: CompositeParams::default(),
        }
    }

    pub fn with_params(params: CompositeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CompositeParams {
        &self.params
    }

    /// Median composite of in-memory rasters.
    ///
    /// All rasters are resampled onto the merged footprint grid; each pixel is
    /// the median of the rasters holding a valid value there. Pixels without
    /// any observation, and exact zeros, are NaN.
    pub fn composite(&self, rasters: &[RasterImage]) -> LstResult<RasterImage> {
        if rasters.is_empty() {
            return Err(LstError::EmptyInput("median composite".to_string()));
        }

        let reference = merge_grid(rasters)?;
        let (height, width) = reference.shape();
        log::debug!("Compositing {} rasters on a {}x{} grid", rasters.len(), height, width);

        let aligned = rasters
            .iter()
            .map(|raster| reproject_match(raster, &reference))
            .collect::<LstResult<Vec<_>>>()?;
        let views: Vec<_> = aligned.iter().map(|r| r.data.view()).collect();
        let stack = ndarray::stack(Axis(0), &views)
            .map_err(|e| LstError::Processing(format!("Failed to stack rasters: {}", e)))?;

        let mut composite = Array2::from_elem((height, width), f64::NAN);
        let zero_as_no_data = self.params.zero_as_no_data;
        let median_at = |lane: ndarray::ArrayView1<f64>| -> f64 {
            let mut values: Vec<f64> = lane.iter().copied().collect();
            match nan_median(&mut values) {
                Some(m) if zero_as_no_data && m == 0.0 => f64::NAN,
                Some(m) => m,
                None => f64::NAN,
            }
        };

        #[cfg(feature = "parallel")]
        {
            ndarray::Zip::from(&mut composite)
                .and(stack.lanes(Axis(0)))
                .par_for_each(|out, lane| *out = median_at(lane));
        }

        #[cfg(not(feature = "parallel"))]
        {
            ndarray::Zip::from(&mut composite)
                .and(stack.lanes(Axis(0)))
                .for_each(|out, lane| *out = median_at(lane));
        }

        Ok(RasterImage::new(
            composite,
            reference.geo_transform,
            reference.projection,
            Some(f64::NAN),
        ))
    }

    /// Cleaned rasters of a masked folder, sorted by file name
    pub fn list_inputs(&self, folder: &Path) -> LstResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(&self.params.input_suffix));
            if path.is_file() && matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Output path of a region's composite: `Median_<folder name>.tif`
    pub fn output_path(&self, folder: &Path) -> PathBuf {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "region".to_string());
        self.params.output_dir.join(format!("Median_{}.tif", name))
    }

    /// Composite every cleaned raster of one masked folder and write the result
    pub fn build_for_folder<P: AsRef<Path>>(&self, folder: P) -> LstResult<PathBuf> {
        let folder = folder.as_ref();
        let files = self.list_inputs(folder)?;
        if files.is_empty() {
            return Err(LstError::EmptyInput(format!("no cleaned rasters in {}", folder.display())));
        }

        let rasters = files
            .iter()
            .map(RasterReader::read)
            .collect::<LstResult<Vec<_>>>()?;
        let composite = self.composite(&rasters)?;

        std::fs::create_dir_all(&self.params.output_dir)?;
        let output_path = self.output_path(folder);
        RasterWriter::write_geotiff(&composite, &output_path)?;

        log::info!(
            "Median composite for images in the folder {} has been completed ({} images)",
            folder.display(),
            files.len()
        );
        Ok(output_path)
    }

    /// Composite several regions; each region succeeds or fails on its own
    pub fn build_for_folders<P: AsRef<Path>>(&self, folders: &[P]) -> Vec<(PathBuf, LstResult<PathBuf>)> {
        folders
            .iter()
            .map(|folder| {
                let folder = folder.as_ref();
                let result = self.build_for_folder(folder);
                if let Err(e) = &result {
                    log::error!("Composite failed for folder {}: {}", folder.display(), e);
                }
                (folder.to_path_buf(), result)
            })
            .collect()
    }
}

impl Default for SeasonalCompositeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;

    fn raster(values: &[f64], x0: f64) -> RasterImage {
        RasterImage::new(
            Array2::from_shape_vec((1, values.len()), values.to_vec()).unwrap(),
            GeoTransform::from_gdal([x0, 1.0, 0.0, 1.0, 0.0, -1.0]),
            String::new(),
            Some(f64::NAN),
        )
    }

    #[test]
    fn test_median_of_valid_observations() {
        let builder = SeasonalCompositeBuilder::new();
        let nan = f64::NAN;
        let rasters = vec![
            raster(&[10.0, nan, 5.0, nan], 0.0),
            raster(&[20.0, 3.0, 7.0, nan], 0.0),
            raster(&[30.0, nan, nan, nan], 0.0),
        ];
        let out = builder.composite(&rasters).unwrap();
        assert_eq!(out.data[[0, 0]], 20.0);
        assert_eq!(out.data[[0, 1]], 3.0);
        assert_eq!(out.data[[0, 2]], 6.0);
        assert!(out.data[[0, 3]].is_nan());
    }

    #[test]
    fn test_zero_becomes_no_data() {
        let builder = SeasonalCompositeBuilder::new();
        let rasters = vec![raster(&[0.0, -2.0], 0.0), raster(&[0.0, 2.0], 0.0)];
        let out = builder.composite(&rasters).unwrap();
        assert!(out.data.iter().all(|v| *v != 0.0));
        assert!(out.data[[0, 0]].is_nan());
        assert!(out.data[[0, 1]].is_nan());
    }

    #[test]
    fn test_disjoint_footprints_merge() {
        let builder = SeasonalCompositeBuilder::new();
        let rasters = vec![raster(&[-173.15, -173.15], 0.0), raster(&[-153.15, -153.15], 1.0)];
        let out = builder.composite(&rasters).unwrap();
        assert_eq!(out.shape(), (1, 3));
        assert_abs_diff_eq!(out.data[[0, 0]], -173.15);
        assert_abs_diff_eq!(out.data[[0, 1]], -163.15, epsilon = 1e-9);
        assert_abs_diff_eq!(out.data[[0, 2]], -153.15);
    }

    #[test]
    fn test_composite_is_deterministic() {
        let builder = SeasonalCompositeBuilder::new();
        let rasters: Vec<_> = (0..5)
            .map(|i| raster(&[0.1 * i as f64 + 21.7, 1.0 / (i as f64 + 3.0)], 0.0))
            .collect();
        let a = builder.composite(&rasters).unwrap();
        let b = builder.composite(&rasters).unwrap();
        let bits = |r: &RasterImage| r.data.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_empty_input_is_reported() {
        let builder = SeasonalCompositeBuilder::new();
        assert!(matches!(builder.composite(&[]), Err(LstError::EmptyInput(_))));
    }

    #[test]
    fn test_output_path_naming() {
        let builder = SeasonalCompositeBuilder::with_params(CompositeParams {
            output_dir: PathBuf::from("/out"),
            ..Default::default()
        });
        assert_eq!(
            builder.output_path(Path::new("/data/Salzburg_2023_Masked")),
            PathBuf::from("/out/Median_Salzburg_2023_Masked.tif")
        );
    }
}
