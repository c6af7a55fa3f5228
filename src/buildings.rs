use geo::{Geometry, InteriorPoint, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::{info, warn};

use crate::{
    area::Area,
    config::Config,
    error::{Error, IoContext, Result},
    observation::ApIndex,
    output, shapes,
};

/// Attribute columns carried by every premises layer.
pub const BUILDING_FIELDS: [&str; 9] = [
    "function_class",
    "building_class",
    "res_count",
    "floor_area",
    "height_toroofbase",
    "height_torooftop",
    "nonres_count",
    "number_of_floors",
    "footprint_area",
];

/// Other names a premises column goes by: the `mistral_` prefixed classes
/// and the 10-character dBase truncations found in shapefiles.
const FIELD_ALIASES: [(&str, &[&str]); 7] = [
    ("function_class", &["mistral_function_class", "mistral_fu"]),
    ("building_class", &["mistral_building_class", "mistral_bu"]),
    ("height_toroofbase", &["height_tor"]),
    ("height_torooftop", &["height_t_1"]),
    ("nonres_count", &["nonres_cou"]),
    ("number_of_floors", &["number_of_"]),
    ("footprint_area", &["footprint_"]),
];

fn aliases(field: &str) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, alt)| *alt)
        .unwrap_or(&[])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingAttributes {
    pub function_class: Option<String>,
    pub building_class: Option<String>,
    pub res_count: Option<f64>,
    pub floor_area: Option<f64>,
    pub height_toroofbase: Option<f64>,
    pub height_torooftop: Option<f64>,
    pub nonres_count: Option<f64>,
    pub number_of_floors: Option<f64>,
    pub footprint_area: Option<f64>,
}

/// A premises reduced to its representative point.
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub location: Point<f64>,
    pub attrs: BuildingAttributes,
}

impl Building {
    pub fn new(location: Point<f64>, attrs: BuildingAttributes) -> Self {
        Self { location, attrs }
    }

    fn from_feature(feature: &shapes::Feature) -> Option<Self> {
        let location = match &feature.geometry {
            Geometry::Point(p) => *p,
            other => other.interior_point()?,
        };
        let text = |field: &str| {
            feature
                .str_prop(field)
                .or_else(|| aliases(field).iter().find_map(|a| feature.str_prop(a)))
        };
        let number = |field: &str| {
            feature
                .f64_prop(field)
                .or_else(|| aliases(field).iter().find_map(|a| feature.f64_prop(a)))
        };
        let attrs = BuildingAttributes {
            function_class: text("function_class"),
            building_class: text("building_class"),
            res_count: number("res_count"),
            floor_area: number("floor_area"),
            height_toroofbase: number("height_toroofbase"),
            height_torooftop: number("height_torooftop"),
            nonres_count: number("nonres_count"),
            number_of_floors: number("number_of_floors"),
            footprint_area: number("footprint_area"),
        };
        Some(Self { location, attrs })
    }

    pub fn res_count(&self) -> f64 {
        self.attrs.res_count.unwrap_or(0.0)
    }

    pub fn nonres_count(&self) -> f64 {
        self.attrs.nonres_count.unwrap_or(0.0)
    }

    pub fn floor_area(&self) -> f64 {
        self.attrs.floor_area.unwrap_or(0.0)
    }

    /// Floor area an AP on the street could plausibly cover: full floor
    /// area for a known height of up to two storeys, otherwise two storeys
    /// of footprint.
    pub fn adjusted_floor_area(&self) -> f64 {
        match self.attrs.number_of_floors {
            Some(floors) if floors <= 2.0 => self.floor_area(),
            _ => 2.0 * self.attrs.footprint_area.unwrap_or(0.0),
        }
    }
}

/// Loads a premises layer, reducing every geometry to a representative point.
pub fn load_buildings(path: &Path) -> Result<Vec<Building>> {
    let mut fields: Vec<&str> = BUILDING_FIELDS.to_vec();
    for (_, alt) in FIELD_ALIASES.iter() {
        fields.extend_from_slice(alt);
    }

    let features = shapes::read_features(path, &fields)?;
    let mut buildings = Vec::with_capacity(features.len());
    let mut skipped = 0;
    for feature in &features {
        match Building::from_feature(feature) {
            Some(b) => buildings.push(b),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {} empty geometries in {:?}", skipped, path);
    }
    Ok(buildings)
}

pub fn write_buildings(path: &Path, buildings: &[Building]) -> Result<()> {
    let mut features = Vec::with_capacity(buildings.len());
    for b in buildings {
        features.push((Geometry::Point(b.location), output::to_properties(&b.attrs)?));
    }
    output::write_geojson(path, features)
}

/// Loads the buildings already split for `area_id` from every LAD folder
/// that has them.
pub fn load_area_buildings(config: &Config, lads: &[String], area_id: &str) -> Result<Vec<Building>> {
    let mut buildings = Vec::new();
    let mut found = false;
    for lad in lads {
        let path = config.area_buildings(lad, area_id);
        if path.exists() {
            found = true;
            buildings.extend(load_buildings(&path)?);
        }
    }
    if !found {
        return Err(Error::MissingData(format!("no building data for {}", area_id)));
    }
    Ok(buildings)
}

/// Loads every premises file in a LAD's raw folder: CSV with a WKT `geom`
/// column, GeoJSON or shapefile. A folder without premises is an error.
pub fn load_lad_premises(folder: &Path) -> Result<Vec<Building>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder).at(folder)? {
        let path = entry.at(folder)?.path();
        match path.extension().and_then(|s| s.to_str()) {
            Some("csv") | Some("geojson") | Some("json") | Some("shp") => files.push(path),
            _ => {}
        }
    }
    files.sort();

    let mut buildings = Vec::new();
    for path in files {
        buildings.extend(load_buildings(&path)?);
    }
    if buildings.is_empty() {
        return Err(Error::MissingData(format!("no premises found in {:?}", folder)));
    }
    Ok(buildings)
}

/// Buildings whose representative point lies in `area`.
pub fn within(buildings: &[Building], index: &ApIndex, area: &Area) -> Vec<Building> {
    index
        .within(&area.geometry)
        .into_iter()
        .filter_map(|i| buildings.get(i).cloned())
        .collect()
}

/// Splits the raw premises of `lad` into one file per area.
/// Returns the number of area files written.
pub fn split_lad(config: &Config, lad: &str, areas: &[&Area]) -> Result<usize> {
    let folder = config.premises_by_lad(lad);
    info!("Loading premises for {}", lad);
    let premises = load_lad_premises(&folder)?;
    let index = ApIndex::from_locations(premises.iter().map(|b| b.location));

    let subsets: Vec<(&str, Vec<Building>)> = areas
        .par_iter()
        .map(|area| (area.id.as_str(), within(&premises, &index, area)))
        .collect();

    for (area_id, subset) in &subsets {
        info!("Writing {} buildings for {}", subset.len(), area_id);
        write_buildings(&config.area_buildings(lad, area_id), subset)?;
    }

    Ok(subsets.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, polygon, MultiPolygon};

    fn building(x: f64, y: f64, floors: Option<f64>, floor_area: Option<f64>, footprint: Option<f64>) -> Building {
        Building::new(
            point!(x: x, y: y),
            BuildingAttributes {
                number_of_floors: floors,
                floor_area,
                footprint_area: footprint,
                ..Default::default()
            },
        )
    }

    #[test]
    fn adjusted_floor_area_caps_tall_buildings() {
        assert_eq!(building(0.0, 0.0, Some(2.0), Some(300.0), Some(150.0)).adjusted_floor_area(), 300.0);
        assert_eq!(building(0.0, 0.0, Some(5.0), Some(750.0), Some(150.0)).adjusted_floor_area(), 300.0);
        assert_eq!(building(0.0, 0.0, Some(4.0), Some(400.0), None).adjusted_floor_area(), 0.0);
    }

    #[test]
    fn unknown_floor_count_counts_as_tall() {
        assert_eq!(building(0.0, 0.0, None, Some(400.0), Some(100.0)).adjusted_floor_area(), 200.0);
        assert_eq!(building(0.0, 0.0, None, Some(120.0), None).adjusted_floor_area(), 0.0);
        assert_eq!(building(0.0, 0.0, None, None, None).floor_area(), 0.0);
    }

    #[test]
    fn polygons_become_representative_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prems.geojson");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature",
                 "properties":{"mistral_function_class":"Residential","res_count":4,"floor_area":"210.0","number_of_floors":null},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[10,0],[10,10],[0,10],[0,0]]]}}
            ]}"#,
        )
        .unwrap();

        let buildings = load_buildings(&path).unwrap();
        assert_eq!(buildings.len(), 1);
        let b = &buildings[0];
        assert_eq!(b.location, point!(x: 5.0, y: 5.0));
        assert_eq!(b.attrs.function_class.as_deref(), Some("Residential"));
        assert_eq!(b.res_count(), 4.0);
        assert_eq!(b.floor_area(), 210.0);
        assert_eq!(b.attrs.number_of_floors, None);
    }

    #[test]
    fn splits_lad_premises_per_area() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_toml("[file_locations]\nbase_path = \"data\"\n", dir.path()).unwrap();

        let raw = vec![
            building(5.0, 5.0, Some(1.0), Some(100.0), Some(100.0)),
            building(15.0, 5.0, Some(1.0), Some(90.0), Some(90.0)),
            building(50.0, 50.0, Some(1.0), Some(80.0), Some(80.0)),
        ];
        write_buildings(&cfg.premises_by_lad("Cambridge").join("part1.geojson"), &raw).unwrap();

        let west = Area::new("CB11", MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)]]));
        let east = Area::new("CB12", MultiPolygon::new(vec![polygon![(x: 10.0, y: 0.0), (x: 20.0, y: 0.0), (x: 20.0, y: 10.0), (x: 10.0, y: 10.0)]]));

        assert_eq!(split_lad(&cfg, "Cambridge", &[&west, &east]).unwrap(), 2);

        let lads = vec!["Cambridge".to_owned()];
        let cb11 = load_area_buildings(&cfg, &lads, "CB11").unwrap();
        assert_eq!(cb11.len(), 1);
        assert_eq!(cb11[0].floor_area(), 100.0);
        assert_eq!(load_area_buildings(&cfg, &lads, "CB12").unwrap().len(), 1);
        assert!(load_area_buildings(&cfg, &lads, "CB99").is_err());
    }

    #[test]
    fn splits_wkt_csv_premises() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_toml("[file_locations]\nbase_path = \"data\"\n", dir.path()).unwrap();
        let folder = cfg.premises_by_lad("E07000008");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join("prems.csv"),
            "geom,mistral_function_class,res_count,floor_area,number_of_floors,footprint_area\n\
             \"POLYGON ((2 2, 6 2, 6 6, 2 6, 2 2))\",Residential,2,150,2,75\n",
        )
        .unwrap();

        let cb11 = Area::new("CB11", MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)]]));
        assert_eq!(split_lad(&cfg, "E07000008", &[&cb11]).unwrap(), 1);

        let loaded = load_area_buildings(&cfg, &["E07000008".to_owned()], "CB11").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].location, point!(x: 4.0, y: 4.0));
        assert_eq!(loaded[0].attrs.function_class.as_deref(), Some("Residential"));
        assert_eq!(loaded[0].floor_area(), 150.0);
        assert_eq!(loaded[0].adjusted_floor_area(), 150.0);
    }

    #[test]
    fn empty_premises_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_toml("[file_locations]\nbase_path = \"data\"\n", dir.path()).unwrap();
        let folder = cfg.premises_by_lad("E07000008");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("readme.txt"), "premises go here").unwrap();

        let cb11 = Area::new("CB11", MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)]]));
        assert!(matches!(split_lad(&cfg, "E07000008", &[&cb11]), Err(Error::MissingData(_))));
        assert!(!cfg.area_buildings("E07000008", "CB11").exists());
    }

    #[test]
    fn shapefile_reads_truncated_column_names() {
        use shapefile::dbase::{FieldValue, Record, TableWriterBuilder};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CB11.shp");
        let table = TableWriterBuilder::new()
            .add_character_field("mistral_fu".try_into().unwrap(), 50)
            .add_numeric_field("floor_area".try_into().unwrap(), 12, 2)
            .add_numeric_field("number_of_".try_into().unwrap(), 6, 1)
            .add_numeric_field("footprint_".try_into().unwrap(), 12, 2)
            .add_numeric_field("nonres_cou".try_into().unwrap(), 6, 1);
        {
            let mut writer = shapefile::Writer::from_path(&path, table).unwrap();
            let mut record = Record::default();
            record.insert("mistral_fu".to_owned(), FieldValue::Character(Some("Retail".to_owned())));
            record.insert("floor_area".to_owned(), FieldValue::Numeric(Some(900.0)));
            record.insert("number_of_".to_owned(), FieldValue::Numeric(Some(3.0)));
            record.insert("footprint_".to_owned(), FieldValue::Numeric(Some(300.0)));
            record.insert("nonres_cou".to_owned(), FieldValue::Numeric(Some(2.0)));
            writer
                .write_shape_and_record(&shapefile::Point::new(5.0, 5.0), &record)
                .unwrap();
        }

        let buildings = load_buildings(&path).unwrap();
        assert_eq!(buildings.len(), 1);
        let b = &buildings[0];
        assert_eq!(b.location, point!(x: 5.0, y: 5.0));
        assert_eq!(b.attrs.function_class.as_deref(), Some("Retail"));
        assert_eq!(b.attrs.number_of_floors, Some(3.0));
        assert_eq!(b.nonres_count(), 2.0);
        assert_eq!(b.adjusted_floor_area(), 600.0);
    }
}
