//! Per-cell aggregation of APs and buildings.
//!
//! Cells come from grid tiling or AP buffering. Each cell is first scored by
//! the APs it intersects; cells without any AP are dropped before buildings
//! are attributed, so building work is only done where there is signal.

use geo::{Area as _, Polygon};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    buildings::Building,
    geotype::{AreaStats, Geotype},
    observation::ApIndex,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub fid: usize,
    pub geometry: Polygon<f64>,
}

impl Cell {
    pub fn new(fid: usize, geometry: Polygon<f64>) -> Self {
        Self { fid, geometry }
    }

    pub fn area_km2(&self) -> f64 {
        self.geometry.unsigned_area() / 1e6
    }
}

/// Building filters that differ between the grid and buffer jobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationRules {
    /// Buildings must have strictly more floor area than this to count.
    pub min_building_floor_area: Option<f64>,
    /// Drop cells whose attributed floor area is zero.
    pub require_floor_area: bool,
}

impl AggregationRules {
    pub const GRID: Self = Self {
        min_building_floor_area: Some(100.0),
        require_floor_area: true,
    };

    pub const BUFFER: Self = Self {
        min_building_floor_area: None,
        require_floor_area: false,
    };

    fn admits(&self, building: &Building) -> bool {
        match self.min_building_floor_area {
            Some(min) => building.floor_area() > min,
            None => true,
        }
    }
}

/// AP count and density of one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApDensity {
    pub waps_collected: usize,
    pub area_km2: f64,
    pub waps_km2: f64,
}

impl ApDensity {
    pub fn of(cell: &Cell, aps: &ApIndex) -> Self {
        let waps_collected = aps.count_in(&cell.geometry);
        let area_km2 = cell.area_km2();
        let waps_km2 = if area_km2 > 0.0 {
            waps_collected as f64 / area_km2
        } else {
            0.0
        };
        Self {
            waps_collected,
            area_km2,
            waps_km2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSummary {
    #[serde(rename = "FID")]
    pub fid: usize,
    pub res_count: f64,
    pub floor_area: f64,
    pub adjusted_floor_area: f64,
    pub building_count: usize,
    pub nonres_count: f64,
    pub waps_collected: usize,
    pub waps_km2: f64,
    pub area_km2: f64,
    pub geotype: Geotype,
    pub lad: String,
    pub population: f64,
    pub unit_area_km2: f64,
    pub pop_density_km2: f64,
}

/// Cells with at least one AP, with their densities.
pub fn cells_with_aps<'a>(cells: &'a [Cell], aps: &ApIndex) -> Vec<(&'a Cell, ApDensity)> {
    let scored: Vec<(&Cell, ApDensity)> = cells
        .par_iter()
        .map(|cell| (cell, ApDensity::of(cell, aps)))
        .filter(|(_, d)| d.waps_km2 > 0.0)
        .collect();
    debug!("{} of {} cells hold APs", scored.len(), cells.len());
    scored
}

/// Scores `cells` against the AP and building layers and annotates them
/// with the statistics of the enclosing unit.
pub fn summarise_cells<'a>(
    cells: &'a [Cell],
    aps: &ApIndex,
    buildings: &[Building],
    stats: &AreaStats,
    rules: AggregationRules,
) -> Vec<(&'a Cell, CellSummary)> {
    let admitted: Vec<&Building> = buildings.iter().filter(|b| rules.admits(b)).collect();
    let building_index = ApIndex::from_locations(admitted.iter().map(|b| b.location));

    cells_with_aps(cells, aps)
        .into_par_iter()
        .map(|(cell, density)| {
            let mut summary = CellSummary {
                fid: cell.fid,
                res_count: 0.0,
                floor_area: 0.0,
                adjusted_floor_area: 0.0,
                building_count: 0,
                nonres_count: 0.0,
                waps_collected: density.waps_collected,
                waps_km2: density.waps_km2,
                area_km2: density.area_km2,
                geotype: stats.geotype,
                lad: stats.lad.clone(),
                population: stats.population,
                unit_area_km2: stats.area_km2,
                pop_density_km2: stats.pop_density_km2,
            };

            for i in building_index.within(&cell.geometry) {
                let b = admitted[i];
                summary.res_count += b.res_count();
                summary.floor_area += b.floor_area();
                summary.adjusted_floor_area += b.adjusted_floor_area();
                summary.nonres_count += b.nonres_count();
                summary.building_count += 1;
            }

            (cell, summary)
        })
        .filter(|(_, s)| !rules.require_floor_area || s.floor_area > 0.0)
        .collect()
}

/// Weighted running mean; non-positive weights are ignored.
#[derive(Debug, Default)]
pub struct Scaler {
    vals: Vec<(f64, f64)>,
}

impl Scaler {
    pub fn new() -> Self {
        Self { vals: Vec::new() }
    }

    pub fn add(&mut self, v: f64, w: f64) {
        if w > 0.0 {
            self.vals.push((v, w));
        }
    }

    pub fn ave(&self) -> Option<f64> {
        if self.vals.is_empty() {
            None
        } else {
            let sum: f64 = self.vals.iter().map(|v| v.1).sum();

            let mut x = 0.0;
            for (v, w) in self.vals.iter() {
                x += v * (w / sum);
            }
            Some(x)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeotypeSummary {
    pub geotype: Geotype,
    pub cells: usize,
    pub waps_collected: usize,
    pub area_km2: f64,
    /// Cell densities averaged by cell area.
    pub waps_km2: Option<f64>,
    pub building_count: usize,
}

/// Rolls cell rows up by geotype, urban first.
pub fn summarise_by_geotype<'a, I>(rows: I) -> Vec<GeotypeSummary>
where
    I: IntoIterator<Item = &'a CellSummary>,
{
    let mut groups: BTreeMap<Geotype, (GeotypeSummary, Scaler)> = BTreeMap::new();
    for row in rows {
        let (acc, scaler) = groups.entry(row.geotype).or_insert_with(|| {
            (
                GeotypeSummary {
                    geotype: row.geotype,
                    cells: 0,
                    waps_collected: 0,
                    area_km2: 0.0,
                    waps_km2: None,
                    building_count: 0,
                },
                Scaler::new(),
            )
        });
        acc.cells += 1;
        acc.waps_collected += row.waps_collected;
        acc.area_km2 += row.area_km2;
        acc.building_count += row.building_count;
        scaler.add(row.waps_km2, row.area_km2);
    }

    groups
        .into_values()
        .map(|(mut acc, scaler)| {
            acc.waps_km2 = scaler.ave();
            acc
        })
        .collect()
}
