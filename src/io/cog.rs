//! Cloud-optimized GeoTIFF conversion of finished composites.

use crate::types::{LstError, LstResult};
use gdal::raster::RasterCreationOption;
use gdal::{Dataset, DriverManager};
use std::path::{Path, PathBuf};

/// Suffix appended to converted files
pub const COG_SUFFIX: &str = "_cog.tif";

const COG_OPTIONS: [(&str, &str); 3] = [
    ("TILED", "YES"),
    ("COPY_SRC_OVERVIEWS", "YES"),
    ("COMPRESS", "DEFLATE"),
];

/// `<stem>_cog.tif` next to the source
pub fn cog_path(src: &Path) -> PathBuf {
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    src.with_file_name(format!("{}{}", stem, COG_SUFFIX))
}

/// Copy a GeoTIFF as a tiled, deflate-compressed GeoTIFF
pub fn convert_to_cog<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> LstResult<()> {
    let src = src.as_ref();
    let dataset = Dataset::open(src).map_err(|e| LstError::RasterRead {
        path: src.to_path_buf(),
        reason: e.to_string(),
    })?;

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options: Vec<RasterCreationOption> = COG_OPTIONS
        .iter()
        .map(|&(key, value)| RasterCreationOption { key, value })
        .collect();
    dataset.create_copy(&driver, dst.as_ref(), &options)?;
    Ok(())
}

/// Convert every `.tif` of a folder that is not already a COG; returns the written paths.
///
/// A file that fails to convert is logged and skipped.
pub fn convert_folder_to_cog<P: AsRef<Path>>(folder: P) -> LstResult<Vec<PathBuf>> {
    let folder = folder.as_ref();
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        if path.is_file() && name.ends_with(".tif") && !name.ends_with(COG_SUFFIX) {
            sources.push(path);
        }
    }
    sources.sort();

    let mut written = Vec::new();
    for src in sources {
        let dst = cog_path(&src);
        match convert_to_cog(&src, &dst) {
            Ok(()) => {
                log::info!("Median composite {} was successfully converted to COG", src.display());
                written.push(dst);
            }
            Err(e) => log::error!("COG conversion failed for {}: {}", src.display(), e),
        }
    }
    Ok(written)
}
