//! Builds the MSOA inputs: boundaries with region and area, and the
//! `oa_lookup.csv` statistics table consumed by the MSOA jobs.

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};
use tracing::warn;

use crate::{
    area::Area,
    buildings::Building,
    error::{Error, Result},
    geotype::Geotype,
};

pub const EW_MSOA_ID_FIELD: &str = "msoa11cd";
pub const SCOTTISH_IZ_ID_FIELD: &str = "InterZone";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputAreaRow {
    #[serde(rename = "OA11CD")]
    pub oa: String,
    #[serde(rename = "MSOA11CD")]
    pub msoa: String,
    #[serde(rename = "LAD17CD")]
    pub lad: String,
    #[serde(rename = "RGN11NM")]
    pub region: String,
}

pub fn load_output_area_lookup<P: AsRef<Path>>(path: P) -> Result<Vec<OutputAreaRow>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

/// MSOA id -> region name, first occurrence wins.
pub fn msoa_regions(rows: &[OutputAreaRow]) -> HashMap<String, String> {
    let mut regions = HashMap::new();
    for row in rows {
        regions
            .entry(row.msoa.clone())
            .or_insert_with(|| row.region.clone());
    }
    regions
}

/// LAD -> MSOA -> output areas, in id order.
pub fn group_by_lad(rows: &[OutputAreaRow]) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let mut lads: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for row in rows {
        lads.entry(row.lad.clone())
            .or_default()
            .entry(row.msoa.clone())
            .or_default()
            .push(row.oa.clone());
    }
    lads
}

/// An MSOA (or Scottish intermediate zone) boundary with its region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsoaArea {
    pub msoa: String,
    pub area_km2: f64,
    pub region: String,
}

/// Joins boundaries with their region. Boundaries without a region are
/// dropped.
pub fn msoa_areas(boundaries: Vec<Area>, regions: &HashMap<String, String>) -> Vec<(Area, MsoaArea)> {
    let mut output = Vec::with_capacity(boundaries.len());
    let mut unmatched = 0;
    for area in boundaries {
        match regions.get(&area.id) {
            Some(region) => {
                let row = MsoaArea {
                    msoa: area.id.clone(),
                    area_km2: area.area_km2(),
                    region: region.clone(),
                };
                output.push((area, row));
            }
            None => unmatched += 1,
        }
    }
    if unmatched > 0 {
        warn!("{} boundaries have no region in the output area lookup", unmatched);
    }
    output
}

#[derive(Deserialize)]
struct PersonRecord {
    #[serde(rename = "Area")]
    area: String,
    #[serde(rename = "HID")]
    hid: String,
    #[serde(rename = "PID")]
    pid: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Residents {
    pub population: usize,
    pub households: usize,
}

/// Distinct people and households per area in a synthetic population file.
pub fn load_residents<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Residents>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut seen: HashMap<String, (HashSet<String>, HashSet<String>)> = HashMap::new();
    for result in rdr.deserialize::<PersonRecord>() {
        let row = result?;
        let (people, households) = seen.entry(row.area).or_default();
        people.insert(row.pid);
        households.insert(row.hid);
    }
    Ok(seen
        .into_iter()
        .map(|(area, (people, households))| {
            (
                area,
                Residents {
                    population: people.len(),
                    households: households.len(),
                },
            )
        })
        .collect())
}

/// Premises counts and summed areas split by residential use.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PremisesStats {
    pub prems_residential: usize,
    pub prems_residential_floor_area: f64,
    pub prems_residential_footprint_area: f64,
    pub prems_non_residential: usize,
    pub prems_non_residential_floor_area: f64,
    pub prems_non_residential_footprint_area: f64,
}

impl PremisesStats {
    pub fn of(buildings: &[Building]) -> Self {
        let mut stats = Self::default();
        for b in buildings {
            let floor = b.attrs.floor_area.unwrap_or(0.0);
            let footprint = b.attrs.footprint_area.unwrap_or(0.0);
            let residential = b
                .attrs
                .function_class
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case("residential"));
            if residential {
                stats.prems_residential += 1;
                stats.prems_residential_floor_area += floor;
                stats.prems_residential_footprint_area += footprint;
            } else {
                stats.prems_non_residential += 1;
                stats.prems_non_residential_floor_area += floor;
                stats.prems_non_residential_footprint_area += footprint;
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.prems_residential + self.prems_non_residential
    }
}

/// One row of `oa_lookup.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsoaRecord {
    pub msoa: String,
    pub lad: String,
    pub region: String,
    pub population: usize,
    pub area_km2: f64,
    pub pop_density_km2: f64,
    pub geotype: Geotype,
    pub households: usize,
    pub prems_residential: usize,
    pub prems_residential_floor_area: f64,
    pub prems_residential_footprint_area: f64,
    pub prems_non_residential: usize,
    pub prems_non_residential_floor_area: f64,
    pub prems_non_residential_footprint_area: f64,
}

/// Region names are stored lower case without spaces, e.g. `eastmidlands`.
pub fn region_key(region: &str) -> String {
    region.to_lowercase().replace(' ', "")
}

pub fn msoa_record(
    lad: &str,
    area: &MsoaArea,
    residents: Residents,
    premises: PremisesStats,
) -> Result<MsoaRecord> {
    if area.area_km2 <= 0.0 {
        return Err(Error::Geometry(format!("{} has no area", area.msoa)));
    }
    let pop_density_km2 = residents.population as f64 / area.area_km2;
    Ok(MsoaRecord {
        msoa: area.msoa.clone(),
        lad: lad.to_owned(),
        region: region_key(&area.region),
        population: residents.population,
        area_km2: area.area_km2,
        pop_density_km2,
        geotype: Geotype::classify(pop_density_km2),
        households: residents.households,
        prems_residential: premises.prems_residential,
        prems_residential_floor_area: premises.prems_residential_floor_area,
        prems_residential_footprint_area: premises.prems_residential_footprint_area,
        prems_non_residential: premises.prems_non_residential,
        prems_non_residential_floor_area: premises.prems_non_residential_floor_area,
        prems_non_residential_footprint_area: premises.prems_non_residential_footprint_area,
    })
}
