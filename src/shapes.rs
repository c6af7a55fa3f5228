use csv::ReaderBuilder;
use geo::{Geometry, MultiPolygon, Point};
use geojson::{GeoJson, JsonObject};
use serde_json::{Number, Value};
use shapefile::{dbase::FieldValue, Shape};
use std::{fs::File, io::BufReader, path::Path};
use wkt::TryFromWkt;

use crate::error::{Error, IoContext, Result};

/// A geometry with its attribute row, from either a shapefile or GeoJSON.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: JsonObject,
}

impl Feature {
    pub fn str_prop(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) => Some(s.trim().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Numeric attribute; NaN and non-numeric values read as missing.
    pub fn f64_prop(&self, key: &str) -> Option<f64> {
        let v = match self.properties.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        v.filter(|x| x.is_finite())
    }

    pub fn polygons(&self) -> Option<MultiPolygon<f64>> {
        match &self.geometry {
            Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
            Geometry::MultiPolygon(mp) => Some(mp.clone()),
            _ => None,
        }
    }
}

/// Column holding the WKT geometry in CSV layers.
pub const WKT_COLUMN: &str = "geom";

/// Reads a vector layer. Shapefile attributes are limited to `fields`;
/// GeoJSON features and CSV rows keep all their properties.
pub fn read_features(path: &Path, fields: &[&str]) -> Result<Vec<Feature>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "shp" => read_shapefile(path, fields),
        "json" | "geojson" => read_geojson(path),
        "csv" => read_wkt_csv(path),
        _ => Err(Error::MissingData(format!(
            "unsupported geometry format: {:?}",
            path
        ))),
    }
}

fn read_shapefile(path: &Path, fields: &[&str]) -> Result<Vec<Feature>> {
    let mut reader = shapefile::Reader::from_path(path)?;
    let mut features = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;
        let Some(geometry) = shape_to_geometry(shape)? else {
            continue;
        };

        let mut properties = JsonObject::new();
        for field in fields {
            if let Some(value) = record.get(field) {
                properties.insert((*field).to_owned(), field_to_json(value));
            }
        }

        features.push(Feature { geometry, properties });
    }

    Ok(features)
}

fn shape_to_geometry(shape: Shape) -> Result<Option<Geometry<f64>>> {
    let geometry = match shape {
        Shape::Point(p) => Geometry::Point(Point::new(p.x, p.y)),
        Shape::PointM(p) => Geometry::Point(Point::new(p.x, p.y)),
        Shape::PointZ(p) => Geometry::Point(Point::new(p.x, p.y)),
        Shape::Polygon(polygon) => {
            let mp: MultiPolygon<f64> = polygon
                .try_into()
                .map_err(|e| Error::Geometry(format!("failed to convert polygon: {:?}", e)))?;
            Geometry::MultiPolygon(mp)
        }
        Shape::PolygonM(polygon) => {
            let mp: MultiPolygon<f64> = polygon
                .try_into()
                .map_err(|e| Error::Geometry(format!("failed to convert polygonM: {:?}", e)))?;
            Geometry::MultiPolygon(mp)
        }
        Shape::PolygonZ(polygon) => {
            let mp: MultiPolygon<f64> = polygon
                .try_into()
                .map_err(|e| Error::Geometry(format!("failed to convert polygonZ: {:?}", e)))?;
            Geometry::MultiPolygon(mp)
        }
        _ => return Ok(None),
    };
    Ok(Some(geometry))
}

fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(s)) => Value::String(s.trim().to_owned()),
        FieldValue::Numeric(Some(n)) => number(*n),
        FieldValue::Float(Some(f)) => number(f64::from(*f)),
        FieldValue::Double(d) => number(*d),
        FieldValue::Integer(i) => Value::from(*i),
        FieldValue::Logical(Some(b)) => Value::Bool(*b),
        _ => Value::Null,
    }
}

fn number(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn read_geojson(path: &Path) -> Result<Vec<Feature>> {
    let file = File::open(path).at(path)?;
    let geojson = GeoJson::from_reader(BufReader::new(file))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(Error::Geometry(format!(
                "{:?} must be a FeatureCollection",
                path
            )))
        }
    };

    let mut features = Vec::new();
    for feature in collection.features {
        let Some(geom) = feature.geometry else {
            continue;
        };
        let geometry: Geometry<f64> = geom.value.try_into()?;
        features.push(Feature {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        });
    }

    Ok(features)
}

/// Reads a CSV with a WKT `geom` column. Other non-empty cells become
/// string properties.
fn read_wkt_csv(path: &Path) -> Result<Vec<Feature>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let headers = rdr.headers()?.clone();
    let geom_col = headers
        .iter()
        .position(|h| h == WKT_COLUMN)
        .ok_or_else(|| Error::MissingData(format!("no {} column in {:?}", WKT_COLUMN, path)))?;

    let mut features = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let text = record.get(geom_col).unwrap_or_default().trim();
        if text.is_empty() {
            continue;
        }
        let geometry = Geometry::<f64>::try_from_wkt_str(text)
            .map_err(|e| Error::Geometry(format!("{:?} row {}: {}", path, row + 1, e)))?;

        let mut properties = JsonObject::new();
        for (i, (name, value)) in headers.iter().zip(record.iter()).enumerate() {
            let value = value.trim();
            if i != geom_col && !value.is_empty() {
                properties.insert(name.to_owned(), Value::from(value));
            }
        }
        features.push(Feature { geometry, properties });
    }

    Ok(features)
}
