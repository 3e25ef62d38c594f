use crate::config::{AppConfig, PointColumns};
use crate::crs::Crs;
use crate::error::PipelineError;
use crate::types::{NeighborhoodPolygon, PointRecord, PolygonLayer};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::GeoJson;
use shapefile::Reader;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

pub fn load_polygons(config: &AppConfig) -> Result<PolygonLayer> {
    let path = &config.input.polygons;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension"))?;

    let layer = match extension.as_str() {
        "shp" => load_shapefile(path, &config.input.polygon_id_field, config.input.polygon_crs)?,
        "json" | "geojson" => {
            load_geojson(path, &config.input.polygon_id_field, config.input.polygon_crs)?
        }
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!(
        polygons = layer.polygons.len(),
        crs = %layer.crs,
        "loaded neighborhood polygons"
    );
    warn_on_duplicate_ids(&layer);
    Ok(layer)
}

fn warn_on_duplicate_ids(layer: &PolygonLayer) {
    let mut seen = HashSet::new();
    for id in layer.ids() {
        if !seen.insert(id) {
            warn!(id, "duplicate neighborhood id; both polygons will share one aggregate");
        }
    }
}

fn load_shapefile(path: &Path, id_field: &str, crs: Option<Crs>) -> Result<PolygonLayer> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut polygons = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id_value = record
            .get(id_field)
            .ok_or_else(|| anyhow!("Id field '{}' not found in Shapefile", id_field))?;

        let id = match id_value {
            shapefile::dbase::FieldValue::Character(Some(s)) => s.trim().to_string(),
            shapefile::dbase::FieldValue::Numeric(Some(n)) => n.to_string(),
            shapefile::dbase::FieldValue::Character(None)
            | shapefile::dbase::FieldValue::Numeric(None) => {
                debug!("skipping shape with empty id");
                continue;
            }
            _ => return Err(anyhow!("Shapefile id field must be text or numeric")),
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon {}: {:?}", id, e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM {}: {:?}", id, e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ {}: {:?}", id, e))?,
            _ => {
                debug!(id = %id, "skipping non-polygon shape");
                continue;
            }
        };

        polygons.push(NeighborhoodPolygon { id, geometry });
    }

    // Shapefiles keep their CRS in a .prj we don't parse
    let crs = crs.unwrap_or_else(|| {
        warn!("no polygon_crs configured for Shapefile input; assuming EPSG:4326");
        Crs::WGS84
    });

    Ok(PolygonLayer::new(crs, polygons))
}

fn load_geojson(path: &Path, id_field: &str, crs: Option<Crs>) -> Result<PolygonLayer> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    // Loads the whole file into memory
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;
    polygons_from_geojson(geojson, id_field, crs)
}

/// Read the legacy (pre RFC 7946) `crs` member, e.g.
/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::2263"}}`.
fn declared_crs(collection: &geojson::FeatureCollection) -> Result<Option<Crs>> {
    let name = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(|name| name.as_str());

    match name {
        Some(name) => Ok(Some(name.parse::<Crs>()?)),
        None => Ok(None),
    }
}

pub fn polygons_from_geojson(
    geojson: GeoJson,
    id_field: &str,
    crs_override: Option<Crs>,
) -> Result<PolygonLayer> {
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    // RFC 7946 data is always WGS84
    let crs = match crs_override {
        Some(crs) => crs,
        None => declared_crs(&collection)?.unwrap_or(Crs::WGS84),
    };

    let mut polygons = Vec::new();

    for (i, feature) in collection.features.into_iter().enumerate() {
        let id_val = feature
            .properties
            .as_ref()
            .and_then(|props| props.get(id_field));

        let id = match (id_val, &feature.id) {
            (Some(serde_json::Value::String(s)), _) => s.clone(),
            (Some(serde_json::Value::Number(n)), _) => n.to_string(),
            (None, Some(geojson::feature::Id::String(s))) => s.clone(),
            (None, Some(geojson::feature::Id::Number(n))) => n.to_string(),
            _ => {
                debug!(feature = i, "skipping feature without id");
                continue;
            }
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let valid_geo: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert geometry of {}: {:?}", id, e))?;

                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        debug!(id = %id, "skipping non-polygon feature");
                        continue;
                    }
                }
            }
            None => {
                debug!(id = %id, "skipping feature without geometry");
                continue;
            }
        };

        polygons.push(NeighborhoodPolygon { id, geometry });
    }

    Ok(PolygonLayer::new(crs, polygons))
}

pub fn load_points(config: &AppConfig) -> Result<Vec<PointRecord>> {
    let path = &config.input.points_csv;
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let records = read_points(file, &config.input.point_columns)
        .with_context(|| format!("Failed to read points from {:?}", path))?;
    info!(points = records.len(), "loaded housing projects");
    Ok(records)
}

/// Parse point records from CSV. Any row whose coordinates or value are
/// missing or non-numeric fails the whole read.
pub fn read_points<R: Read>(reader: R, columns: &PointColumns) -> Result<Vec<PointRecord>> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("Column '{}' not found in CSV", name))
    };

    let lon_idx = column(columns.longitude.as_str())?;
    let lat_idx = column(columns.latitude.as_str())?;
    let value_idx = column(columns.value.as_str())?;
    // Name and status are descriptive only
    let name_idx = column(columns.name.as_str()).ok();
    let status_idx = column(columns.status.as_str()).ok();

    let mut records = Vec::new();

    for (index, result) in rdr.records().enumerate() {
        let row = result?;
        let name = name_idx
            .and_then(|i| row.get(i))
            .map(str::to_string)
            .unwrap_or_else(|| format!("row {}", index + 1));

        let number = |idx: usize, field: &str| -> Result<f64, PipelineError> {
            let raw = row.get(idx).unwrap_or("");
            if raw.is_empty() {
                return Err(PipelineError::MalformedPoint {
                    index,
                    name: name.clone(),
                    reason: format!("missing {}", field),
                });
            }
            match raw.parse::<f64>() {
                // parse accepts NaN and inf
                Ok(v) if v.is_finite() => Ok(v),
                Ok(_) => Err(PipelineError::MalformedPoint {
                    index,
                    name: name.clone(),
                    reason: format!("{} '{}' is not a finite number", field, raw),
                }),
                Err(_) => Err(PipelineError::MalformedPoint {
                    index,
                    name: name.clone(),
                    reason: format!("{} '{}' is not a number", field, raw),
                }),
            }
        };

        let longitude = number(lon_idx, columns.longitude.as_str())?;
        let latitude = number(lat_idx, columns.latitude.as_str())?;
        let units = number(value_idx, columns.value.as_str())?;

        let status = status_idx
            .and_then(|i| row.get(i))
            .unwrap_or("")
            .to_string();

        records.push(PointRecord {
            name,
            longitude,
            latitude,
            units,
            status,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEIGHBORHOODS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"ntaname": "N1"},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature", "properties": {"ntaname": 42},
             "geometry": {"type": "MultiPolygon", "coordinates": [[[[1,0],[2,0],[2,1],[1,1],[1,0]]]]}},
            {"type": "Feature", "properties": {"other": "x"},
             "geometry": {"type": "Polygon", "coordinates": [[[5,5],[6,5],[6,6],[5,5]]]}},
            {"type": "Feature", "properties": {"ntaname": "line"},
             "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}}
        ]
    }"#;

    #[test]
    fn geojson_polygons_with_string_and_numeric_ids() {
        let geojson: GeoJson = NEIGHBORHOODS.parse().unwrap();
        let layer = polygons_from_geojson(geojson, "ntaname", None).unwrap();

        assert_eq!(layer.crs, Crs::WGS84);
        let ids: Vec<&str> = layer.ids().collect();
        assert_eq!(ids, vec!["N1", "42"]);
    }

    #[test]
    fn geojson_declared_crs_and_override() {
        let doc = r#"{
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::2263"}},
            "features": []
        }"#;
        let layer = polygons_from_geojson(doc.parse().unwrap(), "id", None).unwrap();
        assert_eq!(layer.crs, Crs::epsg(2263));

        let layer = polygons_from_geojson(doc.parse().unwrap(), "id", Some(Crs::WGS84)).unwrap();
        assert_eq!(layer.crs, Crs::WGS84);
    }

    #[test]
    fn geojson_must_be_collection() {
        let doc = r#"{"type": "Point", "coordinates": [0, 0]}"#;
        assert!(polygons_from_geojson(doc.parse().unwrap(), "id", None).is_err());
    }

    #[test]
    fn reads_points_with_default_columns() {
        let csv = "project_name,longitude,latitude,affordable_units,status\n\
                   Alpha,0.5,0.5,10,Completed\n\
                   Beta, 1.5 ,0.5,5,In Progress\n";
        let points = read_points(csv.as_bytes(), &PointColumns::default()).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[1].name, "Beta");
        assert_eq!(points[1].longitude, 1.5);
        assert_eq!(points[1].units, 5.0);
        assert_eq!(points[1].status, "In Progress");
    }

    #[test]
    fn missing_coordinate_fails_the_read() {
        let csv = "project_name,longitude,latitude,affordable_units,status\n\
                   Alpha,0.5,0.5,10,Completed\n\
                   Beta,,0.5,5,Completed\n";
        let err = read_points(csv.as_bytes(), &PointColumns::default()).unwrap_err();
        let pipeline = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(pipeline, PipelineError::MalformedPoint { index: 1, .. }));
    }

    #[test]
    fn non_numeric_coordinate_fails_the_read() {
        let csv = "project_name,longitude,latitude,affordable_units,status\n\
                   Alpha,west,0.5,10,Completed\n";
        assert!(read_points(csv.as_bytes(), &PointColumns::default()).is_err());
    }

    #[test]
    fn non_finite_value_fails_the_read() {
        for cell in ["NaN", "inf", "-inf"] {
            let csv = format!(
                "project_name,longitude,latitude,affordable_units,status\n\
                 Alpha,0.5,0.5,10,Completed\n\
                 Beta,0.6,0.5,{},Completed\n",
                cell
            );
            let err = read_points(csv.as_bytes(), &PointColumns::default()).unwrap_err();
            match err.downcast_ref::<PipelineError>() {
                Some(PipelineError::MalformedPoint { index, name, reason }) => {
                    assert_eq!(*index, 1);
                    assert_eq!(name, "Beta");
                    assert!(reason.contains("finite"), "reason was {}", reason);
                }
                other => panic!("unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn non_finite_coordinate_fails_the_read() {
        let csv = "project_name,longitude,latitude,affordable_units,status\n\
                   Alpha,inf,0.5,10,Completed\n";
        assert!(read_points(csv.as_bytes(), &PointColumns::default()).is_err());
    }

    #[test]
    fn geojson_feature_without_geometry_is_skipped() {
        let doc = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"ntaname": "empty"}, "geometry": null},
                {"type": "Feature", "properties": {"ntaname": "N1"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}}
            ]
        }"#;
        let layer = polygons_from_geojson(doc.parse().unwrap(), "ntaname", None).unwrap();
        let ids: Vec<&str> = layer.ids().collect();
        assert_eq!(ids, vec!["N1"]);
    }

    #[test]
    fn missing_required_column_is_reported() {
        let csv = "project_name,lon,latitude,affordable_units\nAlpha,0.5,0.5,10\n";
        let err = read_points(csv.as_bytes(), &PointColumns::default()).unwrap_err();
        assert!(err.to_string().contains("longitude"));
    }
}
