use csv::ReaderBuilder;
use geo::{Geometry, InteriorPoint, Intersects, Point};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, sync::LazyLock};
use tracing::{debug, warn};

use crate::{
    area::Area,
    config::Config,
    error::{Error, Result},
    observation::ApIndex,
    overlay::{cells_with_aps, Cell},
    shapes,
};

static LEADING_LETTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]+").expect("static pattern"));

/// A Code-Point postcode unit reduced to its representative point.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPoint {
    pub postcode: String,
    pub location: Point<f64>,
    pub total_rmdps: f64,
}

/// Postcode area of a sector id: the letters of its first two characters,
/// so `CB11` gives `CB` and `W1G6` gives `W`.
pub fn postcode_area(sector: &str) -> Option<String> {
    let head: String = sector.trim().chars().take(2).collect();
    LEADING_LETTERS
        .find(&head)
        .map(|m| m.as_str().to_uppercase())
}

/// Reads `"postcode","vertical code"` rows into vertical code -> postcode.
pub fn load_vertical_lookup<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut lookup = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        if let (Some(postcode), Some(vertical)) = (record.get(0), record.get(1)) {
            lookup.insert(vertical.trim().to_owned(), postcode.trim().to_owned());
        }
    }
    Ok(lookup)
}

/// Reads the Code-Point count table: postcode in the first column, total
/// delivery points in the fourth.
pub fn load_delivery_counts<P: AsRef<Path>>(path: P) -> Result<HashMap<String, f64>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut counts = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let (Some(postcode), Some(total)) = (record.get(0), record.get(3)) else {
            continue;
        };
        match total.trim().parse::<f64>() {
            Ok(total) => {
                counts.insert(postcode.trim().to_owned(), total);
            }
            Err(_) => debug!("Skipping count row for {}", postcode),
        }
    }
    Ok(counts)
}

/// Resolves vertical street codes and joins counts. Postcodes without a
/// count are dropped.
pub fn join_delivery_points(
    candidates: Vec<(String, Point<f64>)>,
    verticals: &HashMap<String, String>,
    counts: &HashMap<String, f64>,
) -> Vec<DeliveryPoint> {
    candidates
        .into_iter()
        .filter_map(|(postcode, location)| {
            let postcode = if postcode.starts_with('V') {
                match verticals.get(&postcode) {
                    Some(real) => real.clone(),
                    None => {
                        warn!("No vertical street lookup for {}", postcode);
                        postcode
                    }
                }
            } else {
                postcode
            };
            let total_rmdps = *counts.get(&postcode)?;
            Some(DeliveryPoint {
                postcode,
                location,
                total_rmdps,
            })
        })
        .collect()
}

/// Delivery points of `sector` whose representative point lies inside
/// `boundary`.
pub fn subset_codepoint(config: &Config, sector: &str, boundary: &Area) -> Result<Vec<DeliveryPoint>> {
    let area = postcode_area(sector)
        .ok_or_else(|| Error::MissingData(format!("no postcode area in {}", sector)))?;

    let polys = shapes::read_features(&config.codepoint_shapes(&area), &["POSTCODE"])?;
    let candidates: Vec<(String, Point<f64>)> = polys
        .iter()
        .filter_map(|f| {
            let point = match &f.geometry {
                Geometry::Point(p) => *p,
                other => other.interior_point()?,
            };
            Some((f.str_prop("POSTCODE")?, point))
        })
        .filter(|(_, p)| boundary.geometry.intersects(p))
        .collect();

    let verticals = load_vertical_lookup(config.codepoint_vertical_lookup(&area))?;
    let counts = load_delivery_counts(config.codepoint_counts(&area))?;
    Ok(join_delivery_points(candidates, &verticals, &counts))
}

/// `total_rmdps` counts the Code-Point postcode points in the cell and
/// `rmdps_km2` is derived from that count. `delivery_points` sums the
/// delivery point totals of those postcodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmdpSummary {
    #[serde(rename = "FID")]
    pub fid: usize,
    pub waps_collected: usize,
    pub area_km2: f64,
    pub waps_km2: f64,
    pub total_rmdps: usize,
    pub rmdps_km2: f64,
    pub delivery_points: f64,
    pub delivery_points_km2: f64,
}

/// AP density against delivery point density for every cell holding both.
pub fn summarise_rmdp_cells<'a>(
    cells: &'a [Cell],
    aps: &ApIndex,
    points: &[DeliveryPoint],
) -> Vec<(&'a Cell, RmdpSummary)> {
    let index = ApIndex::from_locations(points.iter().map(|p| p.location));

    cells_with_aps(cells, aps)
        .into_par_iter()
        .filter_map(|(cell, density)| {
            let hits = index.within(&cell.geometry);
            if hits.is_empty() {
                return None;
            }
            let delivery_points: f64 = hits.iter().map(|i| points[*i].total_rmdps).sum();
            Some((
                cell,
                RmdpSummary {
                    fid: cell.fid,
                    waps_collected: density.waps_collected,
                    area_km2: density.area_km2,
                    waps_km2: density.waps_km2,
                    total_rmdps: hits.len(),
                    rmdps_km2: hits.len() as f64 / density.area_km2,
                    delivery_points,
                    delivery_points_km2: delivery_points / density.area_km2,
                },
            ))
        })
        .collect()
}
