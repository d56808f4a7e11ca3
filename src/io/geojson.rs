//! GeoJSON input (area of interest) and output (hexagon layer).

use crate::types::{HexagonStatisticsRow, LstError, LstResult};
use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// OGC name of WGS84 with longitude/latitude axis order (EPSG:4326 as written by GeoJSON tools)
pub const CRS84: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonInput {
    FeatureCollection { features: Vec<FeatureInput> },
    Feature(FeatureInput),
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

#[derive(Debug, Deserialize)]
struct FeatureInput {
    geometry: Option<GeometryInput>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeometryInput {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

#[derive(Debug, Serialize)]
struct FeatureCollectionOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    crs: CrsOutput,
    features: Vec<FeatureOutput>,
}

#[derive(Debug, Serialize)]
struct CrsOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct FeatureOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: Map<String, Value>,
    geometry: PolygonOutput,
}

#[derive(Debug, Serialize)]
struct PolygonOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: Vec<Vec<[f64; 2]>>,
}

fn ring_from_positions(ring: &[Vec<f64>]) -> LstResult<LineString<f64>> {
    let coords = ring
        .iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(LstError::InvalidFormat(format!(
                "GeoJSON position needs two coordinates, got {:?}",
                position
            ))),
        })
        .collect::<LstResult<Vec<_>>>()?;
    if coords.len() < 3 {
        return Err(LstError::InvalidFormat("GeoJSON ring has fewer than 3 positions".to_string()));
    }
    Ok(LineString::from(coords))
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> LstResult<Polygon<f64>> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| LstError::InvalidFormat("GeoJSON polygon without rings".to_string()))?;
    let interiors = interiors
        .iter()
        .map(|ring| ring_from_positions(ring))
        .collect::<LstResult<Vec<_>>>()?;
    Ok(Polygon::new(ring_from_positions(exterior)?, interiors))
}

fn first_polygon(geometry: GeometryInput) -> LstResult<Polygon<f64>> {
    match geometry {
        GeometryInput::Polygon { coordinates } => polygon_from_rings(&coordinates),
        GeometryInput::MultiPolygon { coordinates } => {
            if coordinates.len() > 1 {
                log::warn!("AOI is a MultiPolygon with {} parts, using the first", coordinates.len());
            }
            let first = coordinates
                .first()
                .ok_or_else(|| LstError::InvalidFormat("empty MultiPolygon".to_string()))?;
            polygon_from_rings(first)
        }
    }
}

/// Parse the area of interest: the first polygon of a FeatureCollection,
/// Feature or bare Polygon/MultiPolygon geometry, in longitude/latitude.
pub fn parse_aoi(content: &str) -> LstResult<Polygon<f64>> {
    let input: GeoJsonInput = serde_json::from_str(content)?;
    let geometry = match input {
        GeoJsonInput::FeatureCollection { features } => {
            if features.len() > 1 {
                log::warn!("AOI has {} features, using the first", features.len());
            }
            features
                .into_iter()
                .next()
                .and_then(|f| f.geometry)
                .ok_or_else(|| LstError::InvalidFormat("AOI FeatureCollection has no geometry".to_string()))?
        }
        GeoJsonInput::Feature(feature) => feature
            .geometry
            .ok_or_else(|| LstError::InvalidFormat("AOI Feature has no geometry".to_string()))?,
        GeoJsonInput::Polygon { coordinates } => GeometryInput::Polygon { coordinates },
        GeoJsonInput::MultiPolygon { coordinates } => GeometryInput::MultiPolygon { coordinates },
    };
    first_polygon(geometry)
}

/// Read the area of interest from a GeoJSON file
pub fn read_aoi<P: AsRef<Path>>(path: P) -> LstResult<Polygon<f64>> {
    log::info!("Reading AOI from: {}", path.as_ref().display());
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_aoi(&content)
}

fn polygon_output(polygon: &Polygon<f64>) -> PolygonOutput {
    let ring = |ls: &LineString<f64>| ls.coords().map(|c| [c.x, c.y]).collect::<Vec<_>>();
    let mut coordinates = vec![ring(polygon.exterior())];
    coordinates.extend(polygon.interiors().iter().map(ring));
    PolygonOutput {
        kind: "Polygon",
        coordinates,
    }
}

/// Hexagon layer as a GeoJSON FeatureCollection value.
///
/// Each feature carries the cell index as `h3_index` plus one property per
/// statistic label (`null` when missing).
pub fn hexagons_to_geojson(rows: &[HexagonStatisticsRow]) -> LstResult<Value> {
    let mut crs_properties = Map::new();
    crs_properties.insert("name".to_string(), Value::String(CRS84.to_string()));

    let features = rows
        .iter()
        .map(|row| {
            let mut properties = Map::new();
            properties.insert("h3_index".to_string(), Value::String(row.cell.to_string()));
            for (label, value) in &row.statistics {
                let value = value
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number);
                properties.insert(label.clone(), value);
            }
            FeatureOutput {
                kind: "Feature",
                properties,
                geometry: polygon_output(&row.boundary),
            }
        })
        .collect();

    let collection = FeatureCollectionOutput {
        kind: "FeatureCollection",
        crs: CrsOutput {
            kind: "name",
            properties: crs_properties,
        },
        features,
    };
    Ok(serde_json::to_value(collection)?)
}

/// Write the hexagon layer to a GeoJSON file
pub fn write_hexagons<P: AsRef<Path>>(rows: &[HexagonStatisticsRow], output_path: P) -> LstResult<()> {
    let value = hexagons_to_geojson(rows)?;
    let file = std::fs::File::create(output_path.as_ref())?;
    serde_json::to_writer(std::io::BufWriter::new(file), &value)?;
    log::info!(
        "Hexagons geojson with {} cells written to {}",
        rows.len(),
        output_path.as_ref().display()
    );
    Ok(())
}
