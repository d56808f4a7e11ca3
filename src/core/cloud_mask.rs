use crate::core::resample::reproject_match;
use crate::core::statistics::nan_quantiles;
use crate::io::file_matcher::{masked_file_name, DateKeyedFileMatcher};
use crate::io::{RasterReader, RasterWriter};
use crate::types::{LstError, LstResult, RasterImage, TimestampedFilePair};
use ndarray::{Array2, Zip};
use std::path::{Path, PathBuf};

/// Cloud masking parameters
#[derive(Debug, Clone)]
pub struct MaskingParams {
    /// Digital number to Kelvin scale factor
    pub scale_factor: f64,
    /// Subtracted after scaling to obtain degrees Celsius
    pub kelvin_offset: f64,
    /// Raw sample value meaning "no measurement"
    pub raw_fill_value: f64,
    /// Bit of the cloud mask flagging a cloudy pixel
    pub cloud_bit: u32,
    /// Lower outlier quantile (inclusive bound kept)
    pub lower_quantile: f64,
    /// Upper outlier quantile (inclusive bound kept)
    pub upper_quantile: f64,
    /// Skip writing images whose no-data share exceeds this fraction
    pub max_missing_fraction: Option<f64>,
    /// Folder name suffix of raw region folders
    pub raw_suffix: String,
    /// Folder name suffix of masked region folders
    pub masked_suffix: String,
}

impl Default for MaskingParams {
    fn default() -> Self {
        Self {
            scale_factor: 0.02,
            kelvin_offset: 273.15,
            raw_fill_value: 0.0,
            cloud_bit: 2,
            lower_quantile: 0.01,
            upper_quantile: 0.99,
            max_missing_fraction: None,
            raw_suffix: "_Raw".to_string(),
            masked_suffix: "_Masked".to_string(),
        }
    }
}

/// What happened to a single pair
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Written(PathBuf),
    /// Too many no-data pixels after masking
    Skipped { missing_fraction: f64 },
}

/// Summary of masking one region folder
#[derive(Debug, Clone, Default)]
pub struct MaskingReport {
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    pub written: Vec<PathBuf>,
    pub skipped: usize,
    /// Pairs that failed, with the LST path and the error message
    pub failed: Vec<(PathBuf, String)>,
    /// LST or cloud mask files without a counterpart
    pub unmatched_files: usize,
}

/// Converts raw LST rasters to cloud-free temperatures in degrees Celsius
pub struct CloudMaskingEngine {
    params: MaskingParams,
    matcher: DateKeyedFileMatcher,
}

impl CloudMaskingEngine {
    /// Create a masking engine with default parameters
    pub fn new() -> LstResult<Self> {
        Self::with_params(MaskingParams::default())
    }

    /// Create a masking engine with custom parameters
    pub fn with_params(params: MaskingParams) -> LstResult<Self> {
        if !(0.0..=1.0).contains(&params.lower_quantile)
            || !(0.0..=1.0).contains(&params.upper_quantile)
            || params.lower_quantile > params.upper_quantile
        {
            return Err(LstError::Processing(format!(
                "Invalid outlier quantiles [{}, {}]",
                params.lower_quantile, params.upper_quantile
            )));
        }
        if params.cloud_bit > 31 {
            return Err(LstError::Processing(format!("Cloud bit {} out of range", params.cloud_bit)));
        }
        Ok(Self {
            params,
            matcher: DateKeyedFileMatcher::new()?,
        })
    }

    pub fn params(&self) -> &MaskingParams {
        &self.params
    }

    /// Scale digital numbers to degrees Celsius; fill and no-data samples become NaN
    pub fn to_celsius(&self, raw: &RasterImage) -> RasterImage {
        let p = &self.params;
        let data = raw.data.mapv(|dn| {
            if dn == p.raw_fill_value || !raw.is_valid(dn) {
                f64::NAN
            } else {
                dn * p.scale_factor - p.kelvin_offset
            }
        });
        RasterImage::new(data, raw.geo_transform, raw.projection.clone(), Some(f64::NAN))
    }

    /// Cloud flag per pixel: `(mask >> cloud_bit) & 1`. NaN samples are clear.
    pub fn decode_cloud_flags(&self, mask: &RasterImage) -> Array2<bool> {
        let bit = self.params.cloud_bit;
        mask.data.mapv(|v| {
            if v.is_nan() {
                false
            } else {
                ((v as i64) >> bit) & 1 == 1
            }
        })
    }

    /// Blank every flagged pixel; returns the number of pixels newly masked
    pub fn apply_cloud_flags(&self, lst: &mut RasterImage, flags: &Array2<bool>) -> LstResult<usize> {
        if lst.shape() != flags.dim() {
            return Err(LstError::GridMismatch(format!(
                "cloud flags {:?} do not match LST grid {:?}",
                flags.dim(),
                lst.shape()
            )));
        }

        let mut masked_count = 0;
        Zip::from(&mut lst.data).and(flags).for_each(|value, &cloudy| {
            if cloudy && !value.is_nan() {
                *value = f64::NAN;
                masked_count += 1;
            }
        });
        Ok(masked_count)
    }

    /// Drop values outside the image's own [lower, upper] quantile range.
    ///
    /// Returns the bounds used, or `None` when the image has no valid pixel.
    pub fn trim_outliers(&self, lst: &mut RasterImage) -> Option<(f64, f64)> {
        let values: Vec<f64> = lst.data.iter().copied().collect();
        let bounds = nan_quantiles(&values, &[self.params.lower_quantile, self.params.upper_quantile])?;
        let (low, high) = (bounds[0], bounds[1]);

        lst.data.mapv_inplace(|v| if v < low || v > high { f64::NAN } else { v });
        Some((low, high))
    }

    /// Full in-memory masking of one LST raster with its cloud mask
    pub fn mask_images(&self, raw_lst: &RasterImage, cloud_mask: &RasterImage) -> LstResult<RasterImage> {
        let mut lst = self.to_celsius(raw_lst);

        let cloud_on_grid = reproject_match(cloud_mask, &lst)?;
        let flags = self.decode_cloud_flags(&cloud_on_grid);
        let cloudy = self.apply_cloud_flags(&mut lst, &flags)?;
        log::debug!("Cloud mask removed {} pixels", cloudy);

        match self.trim_outliers(&mut lst) {
            Some((low, high)) => log::debug!("Outlier bounds: [{:.3}, {:.3}] °C", low, high),
            None => log::warn!("No valid pixels left after cloud masking"),
        }

        Ok(lst)
    }

    /// Mask one pair and write the result into `output_dir`
    pub fn process_pair(&self, pair: &TimestampedFilePair, output_dir: &Path) -> LstResult<PairOutcome> {
        let raw_lst = RasterReader::read(&pair.lst_path)?;
        let cloud_mask = RasterReader::read(&pair.cloud_mask_path)?;
        let lst = self.mask_images(&raw_lst, &cloud_mask)?;

        if let Some(max_missing) = self.params.max_missing_fraction {
            let total = lst.data.len().max(1);
            let missing_fraction = (total - lst.valid_count()) as f64 / total as f64;
            if missing_fraction > max_missing {
                log::info!(
                    "Skipping {}: {:.1}% of pixels missing",
                    pair.lst_path.display(),
                    missing_fraction * 100.0
                );
                return Ok(PairOutcome::Skipped { missing_fraction });
            }
        }

        let output_path = output_dir.join(masked_file_name(&pair.datetime_utc));
        RasterWriter::write_geotiff(&lst, &output_path)?;
        Ok(PairOutcome::Written(output_path))
    }

    /// Output folder for a raw region folder: `_Raw` becomes `_Masked`
    pub fn output_directory(&self, folder: &Path) -> PathBuf {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let masked_name = if name.contains(&self.params.raw_suffix) {
            name.replace(&self.params.raw_suffix, &self.params.masked_suffix)
        } else {
            format!("{}{}", name, self.params.masked_suffix)
        };
        folder.with_file_name(masked_name)
    }

    /// Mask every matched pair of a raw region folder.
    ///
    /// A failing pair is logged and recorded; the remaining pairs are still processed.
    pub fn process_folder<P: AsRef<Path>>(&self, folder: P) -> LstResult<MaskingReport> {
        let folder = folder.as_ref();
        let matches = self.matcher.match_folder(folder)?;
        if matches.pairs.is_empty() {
            return Err(LstError::EmptyInput(format!(
                "no matched LST/cloud mask pairs in {}",
                folder.display()
            )));
        }

        let output_folder = self.output_directory(folder);
        std::fs::create_dir_all(&output_folder)?;
        log::info!(
            "Masking {} pairs from {} into {}",
            matches.pairs.len(),
            folder.display(),
            output_folder.display()
        );

        let outcomes = self.run_pairs(&matches.pairs, &output_folder);

        let mut report = MaskingReport {
            input_folder: folder.to_path_buf(),
            output_folder,
            unmatched_files: matches.unmatched_total(),
            ..Default::default()
        };
        for (pair, outcome) in matches.pairs.iter().zip(outcomes) {
            match outcome {
                Ok(PairOutcome::Written(path)) => report.written.push(path),
                Ok(PairOutcome::Skipped { .. }) => report.skipped += 1,
                Err(e) => {
                    log::error!("Masking failed for {}: {}", pair.lst_path.display(), e);
                    report.failed.push((pair.lst_path.clone(), e.to_string()));
                }
            }
        }

        log::info!(
            "Masking for folder {} has been completed ({} written, {} skipped, {} failed)",
            folder.display(),
            report.written.len(),
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    #[cfg(feature = "parallel")]
    fn run_pairs(&self, pairs: &[TimestampedFilePair], output_dir: &Path) -> Vec<LstResult<PairOutcome>> {
        use rayon::prelude::*;
        pairs
            .par_iter()
            .map(|pair| self.process_pair(pair, output_dir))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_pairs(&self, pairs: &[TimestampedFilePair], output_dir: &Path) -> Vec<LstResult<PairOutcome>> {
        pairs
            .iter()
            .map(|pair| self.process_pair(pair, output_dir))
            .collect()
    }

    /// Mask several region folders; one region's failure does not stop the others
    pub fn process_folders<P: AsRef<Path>>(&self, folders: &[P]) -> Vec<(PathBuf, LstResult<MaskingReport>)> {
        folders
            .iter()
            .map(|folder| {
                let folder = folder.as_ref();
                let result = self.process_folder(folder);
                if let Err(e) = &result {
                    log::error!("Masking failed for folder {}: {}", folder.display(), e);
                }
                (folder.to_path_buf(), result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;

    fn image(data: Array2<f64>) -> RasterImage {
        RasterImage::new(
            data,
            GeoTransform::from_gdal([13.0, 0.01, 0.0, 47.0, 0.0, -0.01]),
            String::new(),
            None,
        )
    }

    #[test]
    fn test_celsius_conversion() {
        let engine = CloudMaskingEngine::new().unwrap();
        let mut raw = Array2::from_elem((2, 2), 15000.0);
        raw[[0, 1]] = 0.0;
        raw[[1, 0]] = 5000.0;

        let lst = engine.to_celsius(&image(raw));
        assert_abs_diff_eq!(lst.data[[0, 0]], 15000.0 * 0.02 - 273.15, epsilon = 1e-12);
        assert!(lst.data[[0, 1]].is_nan());
        assert_abs_diff_eq!(lst.data[[1, 0]], -173.15, epsilon = 1e-9);
    }

    #[test]
    fn test_declared_no_data_is_dropped() {
        let engine = CloudMaskingEngine::new().unwrap();
        let mut raw = image(Array2::from_elem((1, 2), 14000.0));
        raw.no_data = Some(65535.0);
        raw.data[[0, 1]] = 65535.0;
        let lst = engine.to_celsius(&raw);
        assert!(lst.data[[0, 1]].is_nan());
        assert!(!lst.data[[0, 0]].is_nan());
    }

    #[test]
    fn test_cloud_bit_decoding() {
        let engine = CloudMaskingEngine::new().unwrap();
        let mask = image(Array2::from_shape_vec((1, 5), vec![0.0, 4.0, 3.0, 7.0, f64::NAN]).unwrap());
        let flags = engine.decode_cloud_flags(&mask);
        assert_eq!(flags.as_slice().unwrap(), &[false, true, false, true, false]);
    }

    #[test]
    fn test_cloudy_pixels_become_no_data() {
        let engine = CloudMaskingEngine::new().unwrap();
        let raw = image(Array2::from_elem((3, 3), 15000.0));
        let mut mask_data = Array2::zeros((3, 3));
        mask_data[[1, 1]] = 0b0110 as f64;
        mask_data[[2, 0]] = 0b0001 as f64;

        let lst = engine.mask_images(&raw, &image(mask_data)).unwrap();
        assert!(lst.data[[1, 1]].is_nan());
        assert!(!lst.data[[2, 0]].is_nan());
        assert_eq!(lst.valid_count(), 8);
    }

    #[test]
    fn test_trim_respects_quantile_bounds() {
        let engine = CloudMaskingEngine::new().unwrap();
        let values: Vec<f64> = (1..=200).map(|v| v as f64).collect();
        let mut lst = image(Array2::from_shape_vec((10, 20), values.clone()).unwrap());

        let (low, high) = engine.trim_outliers(&mut lst).unwrap();
        assert_abs_diff_eq!(low, 2.99, epsilon = 1e-9);
        assert_abs_diff_eq!(high, 198.01, epsilon = 1e-9);
        for v in lst.data.iter().filter(|v| !v.is_nan()) {
            assert!(*v >= low && *v <= high);
        }
        assert_eq!(lst.valid_count(), 196);
    }

    #[test]
    fn test_trim_two_distinct_values_and_constant_image() {
        let engine = CloudMaskingEngine::new().unwrap();
        let mut lst = image(Array2::from_shape_vec((1, 2), vec![-173.15, -153.15]).unwrap());
        engine.trim_outliers(&mut lst);
        // interpolated P1/P99 fall strictly between the two samples
        assert_eq!(lst.valid_count(), 0);

        let mut constant = image(Array2::from_elem((4, 4), -173.15));
        engine.trim_outliers(&mut constant);
        assert_eq!(constant.valid_count(), 16);
    }

    #[test]
    fn test_output_directory_naming() {
        let engine = CloudMaskingEngine::new().unwrap();
        assert_eq!(
            engine.output_directory(Path::new("/data/Salzburg_2023_Raw")),
            PathBuf::from("/data/Salzburg_2023_Masked")
        );
        assert_eq!(
            engine.output_directory(Path::new("/data/Vienna")),
            PathBuf::from("/data/Vienna_Masked")
        );
    }

    #[test]
    fn test_invalid_quantiles_rejected() {
        let params = MaskingParams {
            lower_quantile: 0.9,
            upper_quantile: 0.1,
            ..Default::default()
        };
        assert!(CloudMaskingEngine::with_params(params).is_err());
    }
}
