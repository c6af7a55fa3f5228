use csv::{ReaderBuilder, Writer};
use geo::{Geometry, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use crate::{
    area::Area,
    error::{Error, IoContext, Result},
    geotype::{AreaStats, Geotype},
    observation::ApIndex,
    project::Reprojector,
};

/// An area with the number of collected APs inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaApCount {
    pub id: String,
    pub waps_collected: usize,
}

/// Areas intersecting at least one AP, in input order.
pub fn areas_with_data(areas: &[Area], index: &ApIndex) -> Vec<AreaApCount> {
    areas
        .par_iter()
        .map(|area| AreaApCount {
            id: area.id.clone(),
            waps_collected: index.count_in(&area.geometry),
        })
        .filter(|c| c.waps_collected > 0)
        .collect()
}

/// Writes the area list with `id_field` as the id column header.
pub fn write_area_list(path: &Path, id_field: &str, counts: &[AreaApCount]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let mut writer = Writer::from_path(path)?;
    writer.write_record([id_field, "waps_collected"])?;
    for c in counts {
        let n = c.waps_collected.to_string();
        writer.write_record([c.id.as_str(), n.as_str()])?;
    }
    writer.flush().at(path)?;
    Ok(())
}

/// Reads area ids from the first column of a list file.
pub fn load_area_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).flexible(true).from_path(path)?;
    let mut ids = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if let Some(id) = record.get(0).map(str::trim).filter(|s| !s.is_empty()) {
            ids.push(id.to_owned());
        }
    }
    Ok(ids)
}

#[derive(Deserialize)]
struct DeliveryPointRecord {
    postcode_sector: String,
    domestic_delivery_points: f64,
}

/// Domestic delivery points keyed by sector id without spaces.
pub fn load_domestic_delivery_points<P: AsRef<Path>>(path: P) -> Result<HashMap<String, f64>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut output = HashMap::new();
    for result in rdr.deserialize::<DeliveryPointRecord>() {
        let row = result?;
        output.insert(row.postcode_sector.replace(' ', ""), row.domestic_delivery_points);
    }
    Ok(output)
}

#[derive(Deserialize)]
struct ApiPointRecord {
    trilat: f64,
    trilong: f64,
}

/// WiGLE API dump files grouped by sector folder.
pub fn api_sector_files(folder: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut files: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for entry in fs::read_dir(folder).at(folder)? {
        let sector_dir = entry.at(folder)?.path();
        if !sector_dir.is_dir() {
            continue;
        }
        let Some(sector) = sector_dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        for file in fs::read_dir(&sector_dir).at(&sector_dir)? {
            let path = file.at(&sector_dir)?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("csv") {
                files.entry(sector.clone()).or_default().push(path);
            }
        }
    }
    for paths in files.values_mut() {
        paths.sort();
    }
    Ok(files)
}

/// Loads the API dumps of one sector, dropping repeated coordinates, and
/// projects them.
pub fn load_api_points(paths: &[PathBuf], projector: &Reprojector) -> Result<Vec<Point<f64>>> {
    let mut seen = HashSet::new();
    let mut points = Vec::new();
    for path in paths {
        let mut rdr = ReaderBuilder::new().from_path(path)?;
        for result in rdr.deserialize::<ApiPointRecord>() {
            let row = result?;
            if !seen.insert((row.trilong.to_bits(), row.trilat.to_bits())) {
                continue;
            }
            points.push(projector.project(row.trilong, row.trilat)?);
        }
    }
    Ok(points)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorDensity {
    pub pcd_sector: String,
    pub aps: usize,
    pub area_km2: f64,
    pub ap_density_km2: f64,
    pub delivery_points: f64,
    pub delivery_point_density_km2: f64,
}

/// AP density of a sector against its domestic delivery point density.
pub fn sector_density(
    sector: &Area,
    aps: &[Point<f64>],
    delivery_points: &HashMap<String, f64>,
) -> Result<SectorDensity> {
    let delivery = *delivery_points
        .get(&sector.id)
        .ok_or_else(|| Error::MissingData(format!("no delivery points for {}", sector.id)))?;
    let area_km2 = sector.area_km2();
    if area_km2 <= 0.0 {
        return Err(Error::Geometry(format!("sector {} has no area", sector.id)));
    }

    let index = ApIndex::from_locations(aps.iter().copied());
    let count = index.count_in(&sector.geometry);

    Ok(SectorDensity {
        pcd_sector: sector.id.clone(),
        aps: count,
        area_km2,
        ap_density_km2: count as f64 / area_km2,
        delivery_points: delivery,
        delivery_point_density_km2: delivery / area_km2,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorShape {
    pub pcd_sector: String,
    pub lad: Option<String>,
    pub population: Option<f64>,
    pub area_km2: Option<f64>,
    pub pop_density_km2: Option<f64>,
    pub geotype: Option<Geotype>,
}

/// Sector boundaries joined with their statistics. Sectors without
/// statistics are kept with empty attributes.
pub fn sector_shapes(
    sectors: &[Area],
    stats: &HashMap<String, AreaStats>,
) -> Vec<(Geometry<f64>, SectorShape)> {
    sectors
        .iter()
        .map(|s| {
            let st = stats.get(&s.id);
            (
                Geometry::MultiPolygon(s.geometry.clone()),
                SectorShape {
                    pcd_sector: s.id.clone(),
                    lad: st.map(|x| x.lad.clone()),
                    population: st.map(|x| x.population),
                    area_km2: st.map(|x| x.area_km2),
                    pop_density_km2: st.map(|x| x.pop_density_km2),
                    geotype: st.map(|x| x.geotype),
                },
            )
        })
        .collect()
}
