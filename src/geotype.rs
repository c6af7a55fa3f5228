use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::Path};

use crate::error::Result;

pub const URBAN_MIN_DENSITY_KM2: f64 = 7959.0;
pub const SUBURBAN_MIN_DENSITY_KM2: f64 = 782.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Geotype {
    Urban,
    Suburban,
    Rural,
}

impl Geotype {
    /// Classifies an area from its population density (people per km²).
    pub fn classify(pop_density_km2: f64) -> Self {
        if pop_density_km2 > URBAN_MIN_DENSITY_KM2 {
            Geotype::Urban
        } else if pop_density_km2 > SUBURBAN_MIN_DENSITY_KM2 {
            Geotype::Suburban
        } else {
            Geotype::Rural
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Geotype::Urban => "urban",
            Geotype::Suburban => "suburban",
            Geotype::Rural => "rural",
        }
    }
}

impl fmt::Display for Geotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Census statistics for an analysis unit (postcode sector or MSOA).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaStats {
    pub id: String,
    pub lad: String,
    pub region: Option<String>,
    pub population: f64,
    pub area_km2: f64,
    pub pop_density_km2: f64,
    pub households: Option<f64>,
    pub geotype: Geotype,
}

#[derive(Deserialize)]
struct SectorGeotypeRecord {
    id: String,
    lad: String,
    population: f64,
    area_km2: f64,
    pop_density_km2: f64,
}

#[derive(Deserialize)]
struct MsoaLookupRecord {
    msoa: String,
    lad: String,
    region: Option<String>,
    population: f64,
    area_km2: f64,
    pop_density_km2: f64,
    households: Option<f64>,
    geotype: Option<String>,
}

/// Loads postcode sector statistics; the geotype is derived from density.
pub fn load_sector_geotypes<P: AsRef<Path>>(path: P) -> Result<HashMap<String, AreaStats>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut output = HashMap::new();

    for result in rdr.deserialize::<SectorGeotypeRecord>() {
        let row = result?;
        output.insert(
            row.id.clone(),
            AreaStats {
                geotype: Geotype::classify(row.pop_density_km2),
                id: row.id,
                lad: row.lad,
                region: None,
                population: row.population,
                area_km2: row.area_km2,
                pop_density_km2: row.pop_density_km2,
                households: None,
            },
        );
    }

    Ok(output)
}

/// Loads the MSOA lookup. A stored geotype label wins over the density
/// rule; unknown or blank labels fall back to it.
pub fn load_msoa_lookup<P: AsRef<Path>>(path: P) -> Result<HashMap<String, AreaStats>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut output = HashMap::new();

    for result in rdr.deserialize::<MsoaLookupRecord>() {
        let row = result?;
        let geotype = row
            .geotype
            .as_deref()
            .and_then(parse_label)
            .unwrap_or_else(|| Geotype::classify(row.pop_density_km2));
        output.insert(
            row.msoa.clone(),
            AreaStats {
                id: row.msoa,
                lad: row.lad,
                region: row.region,
                population: row.population,
                area_km2: row.area_km2,
                pop_density_km2: row.pop_density_km2,
                households: row.households,
                geotype,
            },
        );
    }

    Ok(output)
}

fn parse_label(label: &str) -> Option<Geotype> {
    let label = label.trim().to_lowercase();
    if label.starts_with("urban") {
        Some(Geotype::Urban)
    } else if label.starts_with("suburban") {
        Some(Geotype::Suburban)
    } else if label.starts_with("rural") {
        Some(Geotype::Rural)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn density_thresholds_are_exclusive() {
        assert_eq!(Geotype::classify(8000.0), Geotype::Urban);
        assert_eq!(Geotype::classify(7959.0), Geotype::Suburban);
        assert_eq!(Geotype::classify(783.0), Geotype::Suburban);
        assert_eq!(Geotype::classify(782.0), Geotype::Rural);
        assert_eq!(Geotype::classify(0.0), Geotype::Rural);
    }

    #[test]
    fn loads_sector_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcd_sector_geotypes.csv");
        fs::write(
            &path,
            "id,lad,population,area_km2,pop_density_km2\n\
             CB11,E07000008,9000,1.5,6000\n\
             W1G6,E09000033,12000,0.5,24000\n",
        )
        .unwrap();

        let table = load_sector_geotypes(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["CB11"].geotype, Geotype::Suburban);
        assert_eq!(table["W1G6"].geotype, Geotype::Urban);
        assert_eq!(table["W1G6"].lad, "E09000033");
    }

    #[test]
    fn msoa_lookup_prefers_stored_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oa_lookup.csv");
        fs::write(
            &path,
            "msoa,lad,region,population,area_km2,pop_density_km2,households,geotype\n\
             E02003719,E07000008,East,8000,2.0,4000,3200,urban\n\
             E02003720,E07000008,East,500,20.0,25,200,\n",
        )
        .unwrap();

        let table = load_msoa_lookup(&path).unwrap();
        assert_eq!(table["E02003719"].geotype, Geotype::Urban);
        assert_eq!(table["E02003720"].geotype, Geotype::Rural);
        assert_eq!(table["E02003719"].households, Some(3200.0));
        assert_eq!(table["E02003719"].region.as_deref(), Some("East"));
    }
}
