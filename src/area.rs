use geo::{Area as _, BoundingRect, InteriorPoint, Intersects, MultiPolygon, Polygon, Rect};
use std::{collections::HashMap, path::Path, path::PathBuf};
use tracing::warn;

use crate::{
    config::Config,
    error::Result,
    geotype::{self, AreaStats},
    shapes,
};

/// Name field of the local authority district boundaries.
pub const LAD_ID_FIELD: &str = "name";

/// The statistical unit a job runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AreaKind {
    /// Postcode sectors, keyed by `StrSect`.
    Sector,
    /// Middle layer super output areas, keyed by `msoa`.
    Msoa,
}

impl AreaKind {
    pub fn id_field(&self) -> &'static str {
        match self {
            AreaKind::Sector => "StrSect",
            AreaKind::Msoa => "msoa",
        }
    }

    pub fn boundaries(&self, config: &Config) -> PathBuf {
        match self {
            AreaKind::Sector => config.sector_shapes(),
            AreaKind::Msoa => config.msoa_shapes(),
        }
    }

    /// File listing the areas that have AP data.
    pub fn list_file(&self, config: &Config) -> PathBuf {
        let name = match self {
            AreaKind::Sector => "pcd_list.csv",
            AreaKind::Msoa => "oa_list.csv",
        };
        config.intermediate().join(name)
    }

    /// Prefix of the per-area result tables.
    pub fn results_prefix(&self) -> &'static str {
        match self {
            AreaKind::Sector => "postcode_aps",
            AreaKind::Msoa => "oa_aps",
        }
    }

    pub fn load_stats(&self, config: &Config) -> Result<HashMap<String, AreaStats>> {
        match self {
            AreaKind::Sector => geotype::load_sector_geotypes(config.sector_geotypes()),
            AreaKind::Msoa => geotype::load_msoa_lookup(config.msoa_lookup()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

impl Area {
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            geometry,
        }
    }

    pub fn envelope(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }

    pub fn area_km2(&self) -> f64 {
        self.geometry.unsigned_area() / 1e6
    }
}

/// Loads polygonal features keyed by `id_field`. Features without an id or
/// with non-polygonal geometry are skipped.
pub fn load_areas(path: &Path, id_field: &str) -> Result<Vec<Area>> {
    let features = shapes::read_features(path, &[id_field])?;
    let mut areas = Vec::with_capacity(features.len());

    for feature in features {
        let Some(id) = feature.str_prop(id_field) else {
            warn!("Feature without {} in {:?}", id_field, path);
            continue;
        };
        match feature.polygons() {
            Some(geometry) => areas.push(Area { id, geometry }),
            None => warn!("Skipping non-polygonal area {}", id),
        }
    }

    Ok(areas)
}

pub fn find<'a>(areas: &'a [Area], id: &str) -> Option<&'a Area> {
    areas.iter().find(|a| a.id == id)
}

/// Ids of the `lads` that intersect the envelope of `boundary`.
pub fn lads_overlapping(boundary: &Area, lads: &[Area]) -> Vec<String> {
    let Some(envelope) = boundary.envelope() else {
        return Vec::new();
    };
    let envelope: Polygon<f64> = envelope.to_polygon();

    lads.iter()
        .filter(|lad| lad.geometry.intersects(&envelope))
        .map(|lad| lad.id.clone())
        .collect()
}

/// The LAD holding the representative point of `area`.
pub fn lad_containing(area: &Area, lads: &[Area]) -> Option<String> {
    let point = area.geometry.interior_point()?;
    lads.iter()
        .find(|lad| lad.geometry.intersects(&point))
        .map(|lad| lad.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use std::fs;

    fn square(id: &str, x: f64, y: f64, side: f64) -> Area {
        Area::new(
            id,
            MultiPolygon::new(vec![polygon![
                (x: x, y: y),
                (x: x + side, y: y),
                (x: x + side, y: y + side),
                (x: x, y: y + side),
            ]]),
        )
    }

    #[test]
    fn finds_overlapping_lads_by_envelope() {
        let sector = square("CB11", 100.0, 100.0, 50.0);
        let lads = vec![
            square("E07000008", 0.0, 0.0, 120.0),
            square("E07000012", 140.0, 140.0, 100.0),
            square("E07000099", 500.0, 500.0, 10.0),
        ];
        assert_eq!(lads_overlapping(&sector, &lads), vec!["E07000008", "E07000012"]);
    }

    #[test]
    fn lad_is_chosen_by_representative_point() {
        let sector = square("CB11", 90.0, 90.0, 20.0);
        let lads = vec![
            square("E07000008", 0.0, 0.0, 95.0),
            square("E07000012", 95.0, 95.0, 100.0),
        ];
        assert_eq!(lad_containing(&sector, &lads).as_deref(), Some("E07000012"));
        assert_eq!(lad_containing(&square("far", 900.0, 900.0, 1.0), &lads), None);
    }

    #[test]
    fn area_in_square_kilometres() {
        let a = square("x", 0.0, 0.0, 2000.0);
        assert!((a.area_km2() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn loads_polygonal_geojson_areas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lads.geojson");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"name":"Cambridge"},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[4,0],[4,4],[0,4],[0,0]]]}},
                {"type":"Feature","properties":{"name":"Pin"},
                 "geometry":{"type":"Point","coordinates":[1,1]}},
                {"type":"Feature","properties":{},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}
            ]}"#,
        )
        .unwrap();

        let areas = load_areas(&path, "name").unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].id, "Cambridge");
        assert!(find(&areas, "Cambridge").is_some());
        assert!(find(&areas, "Pin").is_none());
    }

    #[test]
    fn kind_selects_id_field_and_list() {
        let cfg = Config::from_toml("[file_locations]\nbase_path = \"/d\"\n", Path::new("/")).unwrap();
        assert_eq!(AreaKind::Sector.id_field(), "StrSect");
        assert_eq!(AreaKind::Msoa.list_file(&cfg), PathBuf::from("/d/intermediate/oa_list.csv"));
    }
}
