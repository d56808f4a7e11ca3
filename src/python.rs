//! Python bindings for the processing stages

use crate::core::{
    CloudMaskingEngine, CompositeParams, HexagonParams, HexagonalAggregator, MaskingParams, SeasonalCompositeBuilder,
};
use crate::io::{convert_folder_to_cog, read_aoi, write_hexagons, RasterReader};
use numpy::ToPyArray;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;

fn to_py_err(e: crate::LstError) -> PyErr {
    match e {
        crate::LstError::InvalidResolution(_) | crate::LstError::InvalidFormat(_) => {
            PyValueError::new_err(e.to_string())
        }
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

/// Apply cloud masking to raw region folders; returns the masked folders
#[pyfunction]
#[pyo3(signature = (folders, max_missing_fraction=None))]
fn apply_cloud_masking(folders: Vec<String>, max_missing_fraction: Option<f64>) -> PyResult<Vec<String>> {
    let engine = CloudMaskingEngine::with_params(MaskingParams {
        max_missing_fraction,
        ..Default::default()
    })
    .map_err(to_py_err)?;

    let mut masked = Vec::new();
    for (folder, result) in engine.process_folders(&folders) {
        let report = result.map_err(|e| {
            PyRuntimeError::new_err(format!("{}: {}", folder.display(), e))
        })?;
        masked.push(report.output_folder.to_string_lossy().to_string());
    }
    Ok(masked)
}

/// Build one median composite per masked folder; returns the composite paths
#[pyfunction]
#[pyo3(signature = (folders, output_dir="Summer Median Composites"))]
fn create_median_composite(folders: Vec<String>, output_dir: &str) -> PyResult<Vec<String>> {
    let builder = SeasonalCompositeBuilder::with_params(CompositeParams {
        output_dir: PathBuf::from(output_dir),
        ..Default::default()
    });

    let mut composites = Vec::new();
    for (folder, result) in builder.build_for_folders(&folders) {
        let path = result.map_err(|e| PyRuntimeError::new_err(format!("{}: {}", folder.display(), e)))?;
        composites.push(path.to_string_lossy().to_string());
    }
    Ok(composites)
}

/// Convert the composites of a folder to COG
#[pyfunction]
fn format_median_composite_cog(folder: &str) -> PyResult<Vec<String>> {
    let written = convert_folder_to_cog(folder).map_err(to_py_err)?;
    Ok(written.iter().map(|p| p.to_string_lossy().to_string()).collect())
}

/// Hexagons over the AOI with mean statistics of every COG in `folder`; returns the cell count
#[pyfunction]
#[pyo3(signature = (folder, aoi_geojson, resolution, output="Hexagons_Summer.geojson"))]
fn create_hexagons_with_statistics(folder: &str, aoi_geojson: &str, resolution: u8, output: &str) -> PyResult<usize> {
    let aggregator = HexagonalAggregator::new(HexagonParams {
        resolution,
        ..Default::default()
    })
    .map_err(to_py_err)?;
    let aoi = read_aoi(aoi_geojson).map_err(to_py_err)?;
    let rows = aggregator.aggregate_folder(folder, &aoi).map_err(to_py_err)?;
    write_hexagons(&rows, output).map_err(to_py_err)?;
    Ok(rows.len())
}

/// Hexagon outlines over the AOI without statistics; returns the cell count
#[pyfunction]
fn hexagonal_tessellation(aoi_geojson: &str, resolution: u8, output: &str) -> PyResult<usize> {
    let aggregator = HexagonalAggregator::new(HexagonParams {
        resolution,
        ..Default::default()
    })
    .map_err(to_py_err)?;
    let aoi = read_aoi(aoi_geojson).map_err(to_py_err)?;
    let rows = aggregator.tessellate(&aoi).map_err(to_py_err)?;
    write_hexagons(&rows, output).map_err(to_py_err)?;
    Ok(rows.len())
}

/// Read band 1 of a raster as a numpy array together with its geotransform
#[pyfunction]
fn read_raster(py: Python, path: &str) -> PyResult<PyObject> {
    let raster = RasterReader::read(path).map_err(to_py_err)?;
    let result = PyDict::new(py);
    result.set_item("data", raster.data.to_pyarray(py))?;
    result.set_item("geo_transform", raster.geo_transform.to_gdal().to_vec())?;
    result.set_item("projection", raster.projection)?;
    result.set_item("no_data", raster.no_data)?;
    Ok(result.into())
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(apply_cloud_masking, m)?)?;
    m.add_function(wrap_pyfunction!(create_median_composite, m)?)?;
    m.add_function(wrap_pyfunction!(format_median_composite_cog, m)?)?;
    m.add_function(wrap_pyfunction!(create_hexagons_with_statistics, m)?)?;
    m.add_function(wrap_pyfunction!(hexagonal_tessellation, m)?)?;
    m.add_function(wrap_pyfunction!(read_raster, m)?)?;
    Ok(())
}
