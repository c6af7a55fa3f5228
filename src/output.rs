use csv::{ReaderBuilder, Writer};
use geo::Geometry;
use geojson::{Feature, FeatureCollection, JsonObject};
use serde::Serialize;
use serde_json::Value;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::error::{Error, IoContext, Result};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    Ok(())
}

/// Writes `rows` with a header taken from the first row's field names.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().at(path)?;
    Ok(())
}

/// Serialises a flat record into GeoJSON properties.
pub fn to_properties<T: Serialize>(row: &T) -> Result<JsonObject> {
    match serde_json::to_value(row)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::MissingData(format!(
            "expected a record, got {}",
            other
        ))),
    }
}

pub fn write_geojson<I>(path: &Path, features: I) -> Result<()>
where
    I: IntoIterator<Item = (Geometry<f64>, JsonObject)>,
{
    ensure_parent(path)?;

    let features = features
        .into_iter()
        .map(|(geometry, properties)| Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&geometry))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        })
        .collect();
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    let file = File::create(path).at(path)?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &collection)?;
    out.flush().at(path)?;
    Ok(())
}

/// Concatenates CSV files sharing a header into `output`, adding a
/// leading column with each file's label. Missing inputs are skipped.
/// Returns the number of data rows written.
pub fn combine_csv_files(
    inputs: &[(String, PathBuf)],
    label_column: &str,
    output: &Path,
) -> Result<usize> {
    ensure_parent(output)?;
    let mut writer = Writer::from_path(output)?;
    let mut headers_written = false;
    let mut rows = 0;

    for (label, path) in inputs {
        if !path.exists() {
            continue;
        }
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
        if !headers_written {
            let mut header = vec![label_column.to_owned()];
            header.extend(reader.headers()?.iter().map(str::to_owned));
            writer.write_record(&header)?;
            headers_written = true;
        }

        for result in reader.records() {
            let record = result?;
            let mut row = vec![label.as_str()];
            row.extend(record.iter());
            writer.write_record(&row)?;
            rows += 1;
        }
    }

    writer.flush().at(output)?;
    Ok(rows)
}
