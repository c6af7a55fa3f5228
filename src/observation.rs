use csv::{ReaderBuilder, Writer};
use geo::{BoundingRect, Intersects, Point};
use itertools::Itertools;
use rstar::{primitives::GeomWithData, RTree, AABB};
use std::{fs, path::Path};
use tracing::info;

use crate::{
    config::Config,
    error::{IoContext, Result},
    kml::{self, RawObservation},
    project::Reprojector,
};

/// A collected access point in British National Grid metres.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AccessPoint {
    pub ap_id: usize,
    pub name: String,
    pub network_id: String,
    pub encryption: String,
    pub time: String,
    pub signal: String,
    pub accuracy: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub x: f64,
    pub y: f64,
}

impl AccessPoint {
    pub fn from_raw(raw: RawObservation, location: Point<f64>) -> Self {
        Self {
            ap_id: raw.ap_id,
            name: raw.name,
            network_id: raw.network_id,
            encryption: raw.encryption,
            time: raw.time,
            signal: raw.signal,
            accuracy: raw.accuracy,
            device_type: raw.device_type,
            x: location.x(),
            y: location.y(),
        }
    }

    pub fn location(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }
}

/// Returns the collected points, building the cache from the KML exports
/// on first use.
pub fn collect(config: &Config, refresh: bool) -> Result<Vec<AccessPoint>> {
    let cache = config.collected_points();
    if cache.exists() && !refresh {
        info!("Loading existing processed collected points");
        return load_points(&cache);
    }

    info!("Processing collected points");
    let raw = kml::load_kml_folder(&config.kml_folder())?;
    let projector = Reprojector::wgs84_to_bng()?;

    let mut points = Vec::with_capacity(raw.len());
    for obs in raw {
        let loc = projector.project(obs.lon, obs.lat)?;
        points.push(AccessPoint::from_raw(obs, loc));
    }

    write_points(&cache, &points)?;
    info!("Wrote {} collected points", points.len());
    Ok(points)
}

pub fn load_points<P: AsRef<Path>>(path: P) -> Result<Vec<AccessPoint>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut points = Vec::new();
    for record in rdr.deserialize::<AccessPoint>() {
        points.push(record?);
    }
    Ok(points)
}

pub fn write_points(path: &Path, points: &[AccessPoint]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let mut writer = Writer::from_path(path)?;
    for p in points {
        writer.serialize(p)?;
    }
    writer.flush().at(path)?;
    Ok(())
}

/// Keeps the first observation of every network id.
pub fn dedup_by_network(points: Vec<AccessPoint>) -> Vec<AccessPoint> {
    points
        .into_iter()
        .unique_by(|p| p.network_id.clone())
        .collect()
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// R-tree over access point locations.
///
/// Queries follow `intersects` semantics: a point on a polygon's boundary
/// belongs to it, so points on a shared cell edge count for both cells.
pub struct ApIndex {
    tree: RTree<IndexedPoint>,
    len: usize,
}

impl ApIndex {
    pub fn new(points: &[AccessPoint]) -> Self {
        Self::from_locations(points.iter().map(|p| p.location()))
    }

    pub fn from_locations<I: IntoIterator<Item = Point<f64>>>(locations: I) -> Self {
        let items: Vec<IndexedPoint> = locations
            .into_iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.x(), p.y()], i))
            .collect();
        let len = items.len();
        Self { tree: RTree::bulk_load(items), len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Indices of the points that intersect `geom`.
    pub fn within<G>(&self, geom: &G) -> Vec<usize>
    where
        G: BoundingRect<f64> + Intersects<Point<f64>>,
        G::Output: Into<Option<geo::Rect<f64>>>,
    {
        let rect: Option<geo::Rect<f64>> = geom.bounding_rect().into();
        let Some(rect) = rect else {
            return Vec::new();
        };
        let envelope = AABB::from_corners(
            [rect.min().x, rect.min().y],
            [rect.max().x, rect.max().y],
        );

        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope(&envelope)
            .filter(|item| {
                let [x, y] = *item.geom();
                geom.intersects(&Point::new(x, y))
            })
            .map(|item| item.data)
            .collect();
        hits.sort_unstable();
        hits
    }

    pub fn count_in<G>(&self, geom: &G) -> usize
    where
        G: BoundingRect<f64> + Intersects<Point<f64>>,
        G::Output: Into<Option<geo::Rect<f64>>>,
    {
        self.within(geom).len()
    }
}

/// The points of `index` falling inside `geom`, in input order.
pub fn subset<G>(points: &[AccessPoint], index: &ApIndex, geom: &G) -> Vec<AccessPoint>
where
    G: BoundingRect<f64> + Intersects<Point<f64>>,
    G::Output: Into<Option<geo::Rect<f64>>>,
{
    index
        .within(geom)
        .into_iter()
        .filter_map(|i| points.get(i).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn ap(id: usize, net: &str, x: f64, y: f64) -> AccessPoint {
        AccessPoint {
            ap_id: id,
            name: format!("ap{}", id),
            network_id: net.to_owned(),
            encryption: "WPA2".to_owned(),
            time: "2020-03-28T10:00:00.000Z".to_owned(),
            signal: "-80".to_owned(),
            accuracy: "4".to_owned(),
            device_type: "WIFI".to_owned(),
            x,
            y,
        }
    }

    #[test]
    fn dedup_keeps_first_sighting() {
        let points = vec![
            ap(0, "aa", 0.0, 0.0),
            ap(1, "bb", 1.0, 1.0),
            ap(2, "aa", 5.0, 5.0),
        ];
        let out = dedup_by_network(points);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ap_id, 0);
        assert_eq!(out[1].ap_id, 1);
    }

    #[test]
    fn index_counts_boundary_points() {
        let points = vec![
            ap(0, "a", 5.0, 5.0),
            ap(1, "b", 10.0, 5.0), // on the right edge
            ap(2, "c", 15.0, 5.0),
        ];
        let index = ApIndex::new(&points);
        let cell = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        assert_eq!(index.within(&cell), vec![0, 1]);
    }

    #[test]
    fn index_respects_polygon_shape_not_just_bbox() {
        let points = vec![ap(0, "a", 1.0, 9.0), ap(1, "b", 9.0, 1.0)];
        let index = ApIndex::new(&points);
        // Triangle below the diagonal.
        let tri = MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0)]]);
        assert_eq!(index.count_in(&tri), 1);
        assert_eq!(subset(&points, &index, &tri)[0].ap_id, 1);
    }

    #[test]
    fn points_csv_survives_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intermediate").join("all_collected_points.csv");
        let points = vec![ap(0, "a", 544_800.5, 258_400.25)];
        write_points(&path, &points).unwrap();
        assert_eq!(load_points(&path).unwrap(), points);
    }
}
