use serde::Deserialize;
use std::{fs, path::Path};
use tracing::{info, warn};

use crate::error::{Error, IoContext, Result};

/// An access point observation as exported by WiGLE, still in WGS84.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub ap_id: usize,
    pub name: String,
    pub network_id: String,
    pub encryption: String,
    pub time: String,
    pub signal: String,
    pub accuracy: String,
    pub device_type: String,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Deserialize)]
struct Kml {
    #[serde(rename = "Document")]
    document: KmlDocument,
}

#[derive(Debug, Deserialize)]
struct KmlDocument {
    #[serde(rename = "Folder", default)]
    folders: Vec<KmlFolder>,
}

#[derive(Debug, Deserialize)]
struct KmlFolder {
    #[serde(rename = "Placemark", default)]
    placemarks: Vec<Placemark>,
}

#[derive(Debug, Deserialize)]
struct Placemark {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "Point")]
    point: Option<KmlPoint>,
}

#[derive(Debug, Deserialize)]
struct KmlPoint {
    coordinates: String,
}

const WIFI: &str = "WIFI";

/// Parses a WiGLE KML export, keeping only Wi-Fi placemarks.
///
/// `ap_id` is the placemark's position in the file, so ids stay stable
/// even though Bluetooth and cell placemarks are skipped.
pub fn parse_kml(xml: &str, path: &Path) -> Result<Vec<RawObservation>> {
    let kml: Kml = quick_xml::de::from_str(xml).map_err(|source| Error::Kml {
        path: path.to_path_buf(),
        source,
    })?;

    let placemarks = kml
        .document
        .folders
        .into_iter()
        .flat_map(|f| f.placemarks.into_iter());

    let mut output = Vec::new();
    for (ap_id, pm) in placemarks.enumerate() {
        let description = pm.description.unwrap_or_default();
        let fields: Vec<&str> = description
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(field_value)
            .collect();

        if fields.len() < 6 {
            warn!("Skipping placemark {} in {:?}: short description", ap_id, path);
            continue;
        }
        if fields[5] != WIFI {
            continue;
        }

        let Some((lon, lat)) = pm.point.as_ref().and_then(|p| parse_coordinates(&p.coordinates)) else {
            warn!("Skipping placemark {} in {:?}: bad coordinates", ap_id, path);
            continue;
        };

        output.push(RawObservation {
            ap_id,
            name: pm.name.unwrap_or_default(),
            network_id: fields[0].to_owned(),
            encryption: fields[1].to_owned(),
            time: fields[2].to_owned(),
            signal: fields[3].to_owned(),
            accuracy: fields[4].to_owned(),
            device_type: fields[5].to_owned(),
            lon,
            lat,
        });
    }

    Ok(output)
}

/// Loads every `.kml` file in `folder`, in file name order.
pub fn load_kml_folder(folder: &Path) -> Result<Vec<RawObservation>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder).at(folder)? {
        let path = entry.at(folder)?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("kml") {
            files.push(path);
        }
    }
    files.sort();

    let mut all_data = Vec::new();
    for path in files {
        info!("Loading {:?}", path.file_name().unwrap_or_default());
        let xml = fs::read_to_string(&path).at(&path)?;
        all_data.extend(parse_kml(&xml, &path)?);
    }

    Ok(all_data)
}

/// `Label: value` -> `value`.
fn field_value(line: &str) -> &str {
    line.split_once(':')
        .map(|(_, v)| v.trim())
        .unwrap_or(line)
}

fn parse_coordinates(text: &str) -> Option<(f64, f64)> {
    let mut parts = text.trim().split(',');
    let lon = parts.next()?.trim().parse::<f64>().ok()?;
    let lat = parts.next()?.trim().parse::<f64>().ok()?;
    Some((lon, lat))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
<Style id="highConfidence"><IconStyle><Icon><href>x.png</href></Icon></IconStyle></Style>
<Folder>
<name>Wigle Data</name>
<Placemark>
<name>CoffeeShop</name>
<open>1</open>
<description>Network ID: 00:1A:2B:3C:4D:5E
Encryption: WPA2
Time: 2020-03-28T10:00:00.000Z
Signal: -83.0
Accuracy: 3.79
Type: WIFI</description>
<styleUrl>#highConfidence</styleUrl>
<Point><coordinates>0.1218,52.2053</coordinates></Point>
</Placemark>
<Placemark>
<name>Headphones</name>
<description>Network ID: 11:22:33:44:55:66
Encryption: Misc
Time: 2020-03-28T10:00:01.000Z
Signal: -90.0
Accuracy: 5.0
Type: BT</description>
<Point><coordinates>0.1219,52.2054</coordinates></Point>
</Placemark>
<Placemark>
<name></name>
<description>Network ID: AA:BB:CC:DD:EE:FF
Encryption: Open
Time: 2020-03-28T10:00:02.000Z
Signal: -70.0
Accuracy: 2.0
Type: WIFI</description>
<Point><coordinates>0.1220,52.2055,12.0</coordinates></Point>
</Placemark>
</Folder>
</Document>
</kml>"#;

    #[test]
    fn keeps_only_wifi_placemarks() {
        let obs = parse_kml(SAMPLE, Path::new("sample.kml")).unwrap();
        assert_eq!(obs.len(), 2);

        assert_eq!(obs[0].ap_id, 0);
        assert_eq!(obs[0].name, "CoffeeShop");
        assert_eq!(obs[0].network_id, "00:1A:2B:3C:4D:5E");
        assert_eq!(obs[0].encryption, "WPA2");
        assert_eq!(obs[0].device_type, "WIFI");
        assert!((obs[0].lon - 0.1218).abs() < 1e-12);
        assert!((obs[0].lat - 52.2053).abs() < 1e-12);

        // Index counts the skipped bluetooth placemark.
        assert_eq!(obs[1].ap_id, 2);
        assert_eq!(obs[1].network_id, "AA:BB:CC:DD:EE:FF");
    }

    const DAMAGED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
<Folder>
<Placemark>
<name>Truncated</name>
<description>Network ID: 11:22:33:44:55:66
Encryption: WPA2</description>
<Point><coordinates>0.1218,52.2053</coordinates></Point>
</Placemark>
<Placemark>
<name>Nowhere</name>
<description>Network ID: 11:22:33:44:55:77
Encryption: WPA2
Time: 2020-03-28T10:00:00.000Z
Signal: -80.0
Accuracy: 4.0
Type: WIFI</description>
<Point><coordinates>east,north</coordinates></Point>
</Placemark>
<Placemark>
<name>Kept</name>
<description>Network ID: 11:22:33:44:55:88
Encryption: WPA2
Time: 2020-03-28T10:00:01.000Z
Signal: -75.0
Accuracy: 3.0
Type: WIFI</description>
<Point><coordinates>0.1219,52.2054</coordinates></Point>
</Placemark>
</Folder>
</Document>
</kml>"#;

    #[test]
    fn damaged_placemarks_are_skipped() {
        let obs = parse_kml(DAMAGED, Path::new("damaged.kml")).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].ap_id, 2);
        assert_eq!(obs[0].name, "Kept");
    }

    #[test]
    fn time_value_keeps_inner_colons() {
        assert_eq!(field_value("Time: 10:00:02"), "10:00:02");
        assert_eq!(field_value("Network ID: 00:1A"), "00:1A");
    }

    #[test]
    fn coordinates_with_altitude() {
        assert_eq!(parse_coordinates(" -0.12,51.5,3.0 "), Some((-0.12, 51.5)));
        assert_eq!(parse_coordinates("nope"), None);
    }

    #[test]
    fn loads_folder_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.kml"), SAMPLE).unwrap();
        fs::write(dir.path().join("a.kml"), SAMPLE).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let obs = load_kml_folder(dir.path()).unwrap();
        assert_eq!(obs.len(), 4);
    }
}
