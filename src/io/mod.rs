//! I/O modules for raw file pairing, rasters, GeoJSON and COG output

pub mod file_matcher;
pub mod raster;
pub mod geojson;
pub mod cog;

pub use file_matcher::DateKeyedFileMatcher;
pub use raster::{RasterReader, RasterWriter};
pub use geojson::{read_aoi, parse_aoi, write_hexagons, hexagons_to_geojson};
pub use cog::{convert_to_cog, convert_folder_to_cog};
