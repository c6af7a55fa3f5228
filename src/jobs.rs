//! One procedure per CLI subcommand.
//!
//! Area jobs run every selected area in parallel. An area that fails is
//! logged and listed in `problem_areas.csv`; only setup failures abort.

use geo::{Geometry, Point};
use geojson::JsonObject;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Display,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::{
    area::{self, Area, AreaKind, LAD_ID_FIELD},
    buffer, buildings, codepoint,
    config::Config,
    error::{Error, Result},
    geotype::{self, AreaStats},
    grid,
    observation::{self, AccessPoint, ApIndex},
    output,
    overlay::{self, AggregationRules, Cell, CellSummary},
    preprocess::{self, MsoaArea, MsoaRecord, OutputAreaRow, PremisesStats},
    project::Reprojector,
    sector, trajectory,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    pub job: &'static str,
    pub area_id: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct ProblemLog {
    job: &'static str,
    problems: Vec<Problem>,
}

impl ProblemLog {
    pub fn new(job: &'static str) -> Self {
        Self {
            job,
            problems: Vec::new(),
        }
    }

    pub fn record(&mut self, area_id: &str, reason: impl Display) {
        warn!("Unable to process {}: {}", area_id, reason);
        self.problems.push(Problem {
            job: self.job,
            area_id: area_id.to_owned(),
            reason: reason.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn write(&self, config: &Config) -> Result<()> {
        let path = config.problem_areas();
        output::write_csv(&path, &self.problems)?;
        if self.is_empty() {
            info!("Completed {} with no problem areas", self.job);
        } else {
            warn!("Completed {} with {} problem areas, see {:?}", self.job, self.problems.len(), path);
        }
        Ok(())
    }
}

/// Runs `f` over every area in parallel, sending failures to `problems`.
fn for_each_area<T, F>(areas: &[Area], problems: &mut ProblemLog, f: F) -> Vec<(String, T)>
where
    T: Send,
    F: Fn(&Area) -> Result<T> + Sync,
{
    let outcomes: Vec<(String, Result<T>)> = areas
        .par_iter()
        .map(|area| {
            info!("Working on {}", area.id);
            (area.id.clone(), f(area))
        })
        .collect();

    let mut done = Vec::with_capacity(outcomes.len());
    for (id, outcome) in outcomes {
        match outcome {
            Ok(v) => done.push((id, v)),
            Err(e) => problems.record(&id, e),
        }
    }
    done
}

/// Boundaries of the areas listed for `kind`, or just `only`.
fn selected_areas(config: &Config, kind: AreaKind, only: Option<&str>) -> Result<Vec<Area>> {
    let ids = match only {
        Some(id) => vec![id.to_owned()],
        None => sector::load_area_list(kind.list_file(config))?,
    };
    info!("Loading {:?} boundaries", kind);
    let areas = area::load_areas(&kind.boundaries(config), kind.id_field())?;
    select(areas, &ids)
}

/// Keeps the areas named in `ids`, warning about ids without a boundary.
fn select(areas: Vec<Area>, ids: &[String]) -> Result<Vec<Area>> {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let selected: Vec<Area> = areas
        .into_iter()
        .filter(|a| wanted.contains(a.id.as_str()))
        .collect();

    let found: HashSet<&str> = selected.iter().map(|a| a.id.as_str()).collect();
    for id in wanted.difference(&found) {
        warn!("No boundary found for {}", id);
    }
    if selected.is_empty() {
        return Err(Error::MissingData("none of the selected areas have a boundary".to_owned()));
    }
    Ok(selected)
}

/// Shared inputs of the per-area jobs.
struct Workspace {
    kind: AreaKind,
    points: Vec<AccessPoint>,
    index: ApIndex,
    areas: Vec<Area>,
    lads: Vec<Area>,
    stats: HashMap<String, AreaStats>,
}

impl Workspace {
    fn load(config: &Config, kind: AreaKind, only: Option<&str>) -> Result<Self> {
        let points = observation::collect(config, false)?;
        let index = ApIndex::new(&points);
        let areas = selected_areas(config, kind, only)?;
        info!("Loaded {} points and {} areas", points.len(), areas.len());
        Ok(Self {
            kind,
            points,
            index,
            areas,
            lads: Vec::new(),
            stats: HashMap::new(),
        })
    }

    /// Adds the LAD boundaries and census statistics the building jobs need.
    fn with_context(mut self, config: &Config) -> Result<Self> {
        info!("Loading local authority district boundaries");
        self.lads = area::load_areas(&config.lad_shapes(), LAD_ID_FIELD)?;
        self.stats = self.kind.load_stats(config)?;
        Ok(self)
    }

    fn stats_for(&self, area: &Area) -> Result<&AreaStats> {
        self.stats
            .get(&area.id)
            .ok_or_else(|| Error::MissingData(format!("no statistics for {}", area.id)))
    }

    /// Writes the area boundary and its deduplicated APs to the area's
    /// results folder.
    fn area_points(&self, config: &Config, area: &Area) -> Result<AreaPoints> {
        let folder = config.area_results(&area.id);

        let mut props = JsonObject::new();
        props.insert(self.kind.id_field().to_owned(), Value::from(area.id.as_str()));
        output::write_geojson(
            &folder.join("boundary.geojson"),
            [(Geometry::MultiPolygon(area.geometry.clone()), props)],
        )?;

        let points = observation::dedup_by_network(observation::subset(
            &self.points,
            &self.index,
            &area.geometry,
        ));
        observation::write_points(&folder.join("collected_points.csv"), &points)?;

        let index = ApIndex::new(&points);
        Ok(AreaPoints {
            folder,
            points,
            index,
        })
    }

    fn area_buildings(&self, config: &Config, area: &Area) -> Result<Vec<buildings::Building>> {
        let lads = area::lads_overlapping(area, &self.lads);
        buildings::load_area_buildings(config, &lads, &area.id)
    }
}

struct AreaPoints {
    folder: PathBuf,
    points: Vec<AccessPoint>,
    index: ApIndex,
}

fn write_cells(path: &Path, cells: &[Cell]) -> Result<()> {
    let features = cells.iter().map(|c| {
        let mut props = JsonObject::new();
        props.insert("FID".to_owned(), Value::from(c.fid));
        (Geometry::Polygon(c.geometry.clone()), props)
    });
    output::write_geojson(path, features)
}

/// Writes `<stem>.csv` and `<stem>.geojson` for per-cell rows.
fn write_summaries<T: Serialize>(folder: &Path, stem: &str, rows: &[(&Cell, T)]) -> Result<()> {
    let table: Vec<&T> = rows.iter().map(|(_, row)| row).collect();
    output::write_csv(&folder.join(format!("{}.csv", stem)), &table)?;

    let mut features = Vec::with_capacity(rows.len());
    for (cell, row) in rows {
        features.push((Geometry::Polygon(cell.geometry.clone()), output::to_properties(row)?));
    }
    output::write_geojson(&folder.join(format!("{}.geojson", stem)), features)
}

/// Builds the MSOA boundaries and the `oa_lookup.csv` statistics table.
pub fn preprocess(config: &Config) -> Result<()> {
    info!("Loading output area lookup");
    let rows = preprocess::load_output_area_lookup(config.output_area_lookup())?;
    let regions = preprocess::msoa_regions(&rows);

    info!("Loading MSOA boundaries");
    let mut boundaries = area::load_areas(&config.ew_msoa_boundaries(), preprocess::EW_MSOA_ID_FIELD)?;
    let scottish = config.scottish_iz_boundaries();
    if scottish.exists() {
        boundaries.extend(area::load_areas(&scottish, preprocess::SCOTTISH_IZ_ID_FIELD)?);
    } else {
        warn!("No Scottish intermediate zones at {:?}", scottish);
    }

    let joined = preprocess::msoa_areas(boundaries, &regions);
    let table: Vec<&MsoaArea> = joined.iter().map(|(_, row)| row).collect();
    output::write_csv(&config.msoa_areas_table(), &table)?;
    let mut features = Vec::with_capacity(joined.len());
    for (area, row) in &joined {
        features.push((Geometry::MultiPolygon(area.geometry.clone()), output::to_properties(row)?));
    }
    output::write_geojson(&config.msoa_shapes(), features)?;
    info!("Wrote {} MSOA boundaries to {:?}", joined.len(), config.msoa_shapes());

    let mut problems = ProblemLog::new("preprocess");
    let records = msoa_records(config, &rows, &joined, &mut problems);

    let table: Vec<&MsoaRecord> = records.iter().map(|(_, rec)| rec).collect();
    output::write_csv(&config.msoa_lookup(), &table)?;
    let mut features = Vec::with_capacity(records.len());
    for (area, rec) in &records {
        features.push((Geometry::MultiPolygon(area.geometry.clone()), output::to_properties(rec)?));
    }
    output::write_geojson(&config.msoa_shapes_with_data(), features)?;
    info!("Wrote {} MSOA records to {:?}", records.len(), config.msoa_lookup());
    problems.write(config)
}

/// One record per MSOA with residents, a boundary and premises. LADs run in
/// parallel; a LAD without a household file fails all of its MSOAs.
fn msoa_records<'a>(
    config: &Config,
    rows: &[OutputAreaRow],
    joined: &'a [(Area, MsoaArea)],
    problems: &mut ProblemLog,
) -> Vec<(&'a Area, MsoaRecord)> {
    let shapes: HashMap<&str, &(Area, MsoaArea)> =
        joined.iter().map(|entry| (entry.1.msoa.as_str(), entry)).collect();
    let lads: Vec<(String, BTreeMap<String, Vec<String>>)> =
        preprocess::group_by_lad(rows).into_iter().collect();

    let outcomes: Vec<Vec<(String, Result<(&'a Area, MsoaRecord)>)>> = lads
        .par_iter()
        .map(|(lad, msoas)| {
            info!("Working on {}", lad);
            let residents = preprocess::load_residents(config.household_demographics(lad));
            msoas
                .iter()
                .map(|(msoa, oas)| {
                    let outcome = match &residents {
                        Ok(residents) => msoa_record(config, lad, msoa, oas, residents, &shapes),
                        Err(e) => Err(Error::MissingData(format!("no household file for {}: {}", lad, e))),
                    };
                    (msoa.clone(), outcome)
                })
                .collect()
        })
        .collect();

    let mut records = Vec::new();
    for (msoa, outcome) in outcomes.into_iter().flatten() {
        match outcome {
            Ok(rec) => records.push(rec),
            Err(e) => problems.record(&msoa, e),
        }
    }
    records
}

fn msoa_record<'a>(
    config: &Config,
    lad: &str,
    msoa: &str,
    oas: &[String],
    residents: &HashMap<String, preprocess::Residents>,
    shapes: &HashMap<&str, &'a (Area, MsoaArea)>,
) -> Result<(&'a Area, MsoaRecord)> {
    let (area, row) = shapes
        .get(msoa)
        .copied()
        .ok_or_else(|| Error::MissingData(format!("no boundary for {}", msoa)))?;
    let people = residents
        .get(msoa)
        .copied()
        .ok_or_else(|| Error::MissingData(format!("no households for {}", msoa)))?;
    let premises = msoa_premises(config, lad, oas)?;
    Ok((area, preprocess::msoa_record(lad, row, people, premises)?))
}

/// Premises statistics over the output area files that exist for an MSOA.
fn msoa_premises(config: &Config, lad: &str, oas: &[String]) -> Result<PremisesStats> {
    let folder = config.premises_by_lad(lad);
    let mut premises = Vec::new();
    for oa in oas {
        let path = folder.join(format!("{}.csv", oa));
        if path.exists() {
            premises.extend(buildings::load_buildings(&path)?);
        }
    }
    if premises.is_empty() {
        return Err(Error::MissingData(format!("no premises in {:?}", folder)));
    }
    Ok(PremisesStats::of(&premises))
}

pub fn collect(config: &Config, refresh: bool) -> Result<()> {
    let points = observation::collect(config, refresh)?;
    info!("{} collected points available", points.len());
    Ok(())
}

pub fn list_areas(config: &Config, kind: AreaKind) -> Result<()> {
    let points = observation::collect(config, false)?;
    let index = ApIndex::new(&points);

    info!("Loading {:?} boundaries", kind);
    let areas = area::load_areas(&kind.boundaries(config), kind.id_field())?;

    let counts = sector::areas_with_data(&areas, &index);
    let path = kind.list_file(config);
    sector::write_area_list(&path, kind.id_field(), &counts)?;
    info!("{} of {} areas hold APs, written to {:?}", counts.len(), areas.len(), path);
    Ok(())
}

pub fn split_buildings(config: &Config, kind: AreaKind, only: Option<&str>) -> Result<()> {
    let areas = selected_areas(config, kind, only)?;
    let lads = area::load_areas(&config.lad_shapes(), LAD_ID_FIELD)?;
    let mut problems = ProblemLog::new("split-buildings");

    let mut by_lad: BTreeMap<String, Vec<&Area>> = BTreeMap::new();
    for a in &areas {
        match area::lad_containing(a, &lads) {
            Some(lad) => by_lad.entry(lad).or_default().push(a),
            None => problems.record(&a.id, "no local authority district contains the area"),
        }
    }

    for (lad, members) in &by_lad {
        match buildings::split_lad(config, lad, members) {
            Ok(n) => info!("Split {} premises into {} areas", lad, n),
            Err(e) => {
                for a in members {
                    problems.record(&a.id, &e);
                }
            }
        }
    }

    problems.write(config)
}

pub fn grid(config: &Config, sizes: &[u32], only: Option<&str>) -> Result<()> {
    let ws = Workspace::load(config, AreaKind::Sector, only)?.with_context(config)?;
    let mut problems = ProblemLog::new("grid");
    let prefix = ws.kind.results_prefix();

    let done = for_each_area(&ws.areas, &mut problems, |area| {
        let stats = ws.stats_for(area)?;
        let inputs = ws.area_points(config, area)?;
        let buildings = ws.area_buildings(config, area)?;

        let mut cells_written = 0;
        for &size in sizes {
            let cells = grid::grid_area(area, f64::from(size))?;
            write_cells(&inputs.folder.join(format!("grid_{}.geojson", size)), &cells)?;

            let rows = overlay::summarise_cells(&cells, &inputs.index, &buildings, stats, AggregationRules::GRID);
            info!("{}: {} of {} {}m cells kept", area.id, rows.len(), cells.len(), size);
            write_summaries(&inputs.folder, &format!("{}_gridded_{}", prefix, size), &rows)?;
            cells_written += rows.len();
        }
        Ok(cells_written)
    });

    info!("Gridded {} areas", done.len());
    problems.write(config)
}

pub fn buffer(config: &Config, kind: AreaKind, sizes: &[u32], only: Option<&str>) -> Result<()> {
    let ws = Workspace::load(config, kind, only)?.with_context(config)?;
    let mut problems = ProblemLog::new("buffer");
    let prefix = kind.results_prefix();

    let done = for_each_area(&ws.areas, &mut problems, |area| {
        let stats = ws.stats_for(area)?;
        let inputs = ws.area_points(config, area)?;
        let buildings = ws.area_buildings(config, area)?;
        let locations: Vec<Point<f64>> = inputs.points.iter().map(|p| p.location()).collect();

        let mut by_size = Vec::with_capacity(sizes.len());
        for &size in sizes {
            let cells = buffer::buffer_points(&locations, f64::from(size))?;
            write_cells(&inputs.folder.join(format!("buffered_points_{}.geojson", size)), &cells)?;

            let rows = overlay::summarise_cells(&cells, &inputs.index, &buildings, stats, AggregationRules::BUFFER);
            write_summaries(&inputs.folder, &format!("{}_buffered_{}", prefix, size), &rows)?;
            by_size.push((size, rows.into_iter().map(|(_, s)| s).collect::<Vec<CellSummary>>()));
        }
        Ok(by_size)
    });

    for &size in sizes {
        let rows = done
            .iter()
            .flat_map(|(_, by_size)| by_size.iter())
            .filter(|(s, _)| *s == size)
            .flat_map(|(_, rows)| rows.iter());
        let summary = overlay::summarise_by_geotype(rows);
        output::write_csv(
            &config.results.join(format!("buffered_geotype_summary_{}m.csv", size)),
            &summary,
        )?;
    }

    if kind == AreaKind::Msoa {
        collate(config, kind, &done, sizes)?;
    }

    problems.write(config)
}

/// Concatenates the per-area buffer tables into one file per size.
fn collate<T>(config: &Config, kind: AreaKind, done: &[(String, T)], sizes: &[u32]) -> Result<()> {
    for &size in sizes {
        let inputs: Vec<(String, PathBuf)> = done
            .iter()
            .map(|(id, _)| {
                let file = format!("{}_buffered_{}.csv", kind.results_prefix(), size);
                (id.clone(), config.area_results(id).join(file))
            })
            .collect();
        let path = config.results.join(format!("all_buffered_points_{}m.csv", size));
        let rows = output::combine_csv_files(&inputs, kind.id_field(), &path)?;
        info!("Collated {} rows into {:?}", rows, path);
    }
    Ok(())
}

pub fn rmdp(config: &Config, size: u32, only: Option<&str>) -> Result<()> {
    let ws = Workspace::load(config, AreaKind::Sector, only)?;
    let mut problems = ProblemLog::new("rmdp");

    let done = for_each_area(&ws.areas, &mut problems, |area| {
        let inputs = ws.area_points(config, area)?;

        let delivery = codepoint::subset_codepoint(config, &area.id, area)?;
        let features = delivery.iter().map(|d| {
            let mut props = JsonObject::new();
            props.insert("POSTCODE".to_owned(), Value::from(d.postcode.as_str()));
            props.insert("total_rmdps".to_owned(), Value::from(d.total_rmdps));
            (Geometry::Point(d.location), props)
        });
        output::write_geojson(&inputs.folder.join("codepoint_points.geojson"), features)?;

        let cells = grid::grid_area(area, f64::from(size))?;
        write_cells(&inputs.folder.join(format!("grid_{}.geojson", size)), &cells)?;

        let rows = codepoint::summarise_rmdp_cells(&cells, &inputs.index, &delivery);
        write_summaries(&inputs.folder, &format!("grid_with_points_{}", size), &rows)?;
        Ok(rows.len())
    });

    info!("Compared delivery points in {} areas", done.len());
    problems.write(config)
}

pub fn sector_density(config: &Config) -> Result<()> {
    let delivery = sector::load_domestic_delivery_points(config.domestic_delivery_points())?;
    let sectors = area::load_areas(&config.sector_shapes(), AreaKind::Sector.id_field())?;
    let projector = Reprojector::wgs84_to_bng()?;
    let files = sector::api_sector_files(&config.api_sector_folder())?;
    let mut problems = ProblemLog::new("sector-density");

    let mut rows = Vec::with_capacity(files.len());
    for (id, paths) in &files {
        let outcome = area::find(&sectors, id)
            .ok_or_else(|| Error::MissingData(format!("no boundary for {}", id)))
            .and_then(|boundary| {
                let aps = sector::load_api_points(paths, &projector)?;
                sector::sector_density(boundary, &aps, &delivery)
            });
        match outcome {
            Ok(row) => {
                info!("{}: {} APs, {:.2} per km2", id, row.aps, row.ap_density_km2);
                rows.push(row);
            }
            Err(e) => problems.record(id, e),
        }
    }

    output::write_csv(&config.results.join("density_results.csv"), &rows)?;
    problems.write(config)
}

pub fn sector_shapes(config: &Config) -> Result<()> {
    let sectors = area::load_areas(&config.sector_shapes(), AreaKind::Sector.id_field())?;
    let stats = geotype::load_sector_geotypes(config.sector_geotypes())?;

    let mut features = Vec::with_capacity(sectors.len());
    for (geometry, row) in sector::sector_shapes(&sectors, &stats) {
        features.push((geometry, output::to_properties(&row)?));
    }
    let path = config.sector_shapes_output();
    output::write_geojson(&path, features)?;
    info!("Wrote {} sector shapes to {:?}", sectors.len(), path);
    Ok(())
}

pub fn trajectory(
    config: &Config,
    gps: Option<&Path>,
    captures: Option<&Path>,
    output_path: Option<&Path>,
) -> Result<()> {
    let gps = gps.map(Path::to_path_buf).unwrap_or_else(|| config.gps_trajectories());
    let captures = captures.map(Path::to_path_buf).unwrap_or_else(|| config.drive_captures());
    let out = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.results.join("trajectory_results.csv"));

    info!("Importing GPS trajectories");
    let fixes = trajectory::load_gps_fixes(&gps)?;
    info!("Importing collected APs");
    let aps = trajectory::load_ap_captures(&captures)?;

    let rows = trajectory::merge(&fixes, &aps);
    output::write_csv(&out, &rows)?;
    info!("Wrote {} trajectory rows to {:?}", rows.len(), out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildings::{Building, BuildingAttributes};
    use geo::{point, polygon, MultiPolygon};
    use std::fs;

    const OA_LOOKUP: &str = "msoa,lad,region,population,area_km2,pop_density_km2,households,geotype\n\
        E02000001,Cambridge,East,9000,1.5,6000,3000,suburban\n";

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

    fn ap(id: usize, net: &str, x: f64, y: f64) -> AccessPoint {
        AccessPoint {
            ap_id: id,
            name: String::new(),
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

    /// A base folder with APs, one MSOA lookup row and its buildings.
    fn fixture(dir: &Path) -> Config {
        let cfg = Config::from_toml(
            "[file_locations]\nbase_path = \"data\"\nresults = \"results\"\n",
            dir,
        )
        .unwrap();

        observation::write_points(
            &cfg.collected_points(),
            &[
                ap(0, "aa", 100.0, 100.0),
                ap(1, "aa", 101.0, 100.0),
                ap(2, "bb", 100.5, 101.0),
                ap(3, "cc", 800.0, 800.0),
                ap(4, "dd", 5000.0, 5000.0),
            ],
        )
        .unwrap();

        fs::create_dir_all(cfg.intermediate()).unwrap();
        fs::write(cfg.msoa_lookup(), OA_LOOKUP).unwrap();
        fs::write(kind_list(&cfg), "msoa\nE02000001\n").unwrap();

        buildings::write_buildings(
            &cfg.area_buildings("Cambridge", "E02000001"),
            &[Building::new(
                point!(x: 120.0, y: 100.0),
                BuildingAttributes {
                    res_count: Some(3.0),
                    floor_area: Some(250.0),
                    number_of_floors: Some(2.0),
                    ..Default::default()
                },
            )],
        )
        .unwrap();

        cfg
    }

    fn kind_list(cfg: &Config) -> PathBuf {
        AreaKind::Msoa.list_file(cfg)
    }

    fn workspace(cfg: &Config) -> Workspace {
        let points = observation::load_points(cfg.collected_points()).unwrap();
        let index = ApIndex::new(&points);
        Workspace {
            kind: AreaKind::Msoa,
            points,
            index,
            areas: vec![square("E02000001", 0.0, 0.0, 1000.0)],
            lads: vec![square("Cambridge", -100.0, -100.0, 2000.0)],
            stats: geotype::load_msoa_lookup(cfg.msoa_lookup()).unwrap(),
        }
    }

    #[test]
    fn area_points_are_deduplicated_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture(dir.path());
        let ws = workspace(&cfg);

        let inputs = ws.area_points(&cfg, &ws.areas[0]).unwrap();
        let ids: Vec<usize> = inputs.points.iter().map(|p| p.ap_id).collect();
        assert_eq!(ids, vec![0, 2, 3]);
        assert!(inputs.folder.join("boundary.geojson").exists());
        assert_eq!(
            observation::load_points(inputs.folder.join("collected_points.csv")).unwrap().len(),
            3
        );
    }

    #[test]
    fn buffer_rows_and_collation() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture(dir.path());
        let ws = workspace(&cfg);
        let area = &ws.areas[0];

        let inputs = ws.area_points(&cfg, area).unwrap();
        let buildings = ws.area_buildings(&cfg, area).unwrap();
        let locations: Vec<Point<f64>> = inputs.points.iter().map(|p| p.location()).collect();
        let cells = buffer::buffer_points(&locations, 50.0).unwrap();
        assert_eq!(cells.len(), 2);

        let rows = overlay::summarise_cells(&cells, &inputs.index, &buildings, ws.stats_for(area).unwrap(), AggregationRules::BUFFER);
        assert_eq!(rows.len(), 2);
        let near = rows.iter().find(|(_, s)| s.building_count == 1).unwrap();
        assert_eq!(near.1.waps_collected, 2);
        assert_eq!(near.1.floor_area, 250.0);
        assert_eq!(near.1.lad, "Cambridge");

        write_summaries(&inputs.folder, "oa_aps_buffered_50", &rows).unwrap();
        let done = vec![("E02000001".to_owned(), ())];
        collate(&cfg, AreaKind::Msoa, &done, &[50]).unwrap();

        let all = fs::read_to_string(cfg.results.join("all_buffered_points_50m.csv")).unwrap();
        let mut lines = all.lines();
        assert!(lines.next().unwrap().starts_with("msoa,FID,res_count"));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn missing_statistics_become_problems() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture(dir.path());
        let mut ws = workspace(&cfg);
        ws.areas.push(square("E02000002", 2000.0, 0.0, 100.0));

        let mut problems = ProblemLog::new("buffer");
        let done = for_each_area(&ws.areas, &mut problems, |area| ws.stats_for(area).map(|s| s.population));
        assert_eq!(done, vec![("E02000001".to_owned(), 9000.0)]);
        assert_eq!(problems.len(), 1);

        problems.write(&cfg).unwrap();
        let text = fs::read_to_string(cfg.problem_areas()).unwrap();
        assert!(text.starts_with("job,area_id,reason\nbuffer,E02000002,"));
    }

    #[test]
    fn selection_keeps_named_areas() {
        let areas = vec![square("E02000001", 0.0, 0.0, 10.0), square("E02000002", 10.0, 0.0, 10.0)];
        let picked = select(areas.clone(), &["E02000002".to_owned(), "E02000009".to_owned()]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "E02000002");

        assert!(select(areas, &["E02000009".to_owned()]).is_err());
    }

    #[test]
    fn trajectory_defaults_to_base_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixture(dir.path());

        fs::write(
            cfg.gps_trajectories(),
            "Date2,Lat,Lng\n2020-03-28 10:00:00+00,52.2,0.12\n2020-03-28 10:00:10+00,52.3,0.13\n",
        )
        .unwrap();
        fs::write(cfg.drive_captures(), "Time,Source\n10:00:05+00,wifi\n").unwrap();

        trajectory(&cfg, None, None, None).unwrap();
        let text = fs::read_to_string(cfg.results.join("trajectory_results.csv")).unwrap();
        assert_eq!(text, "date,gps_time,lat,lon,ap_count\n2020-03-28,10:00:10,52.3,0.13,1\n");
    }

    #[test]
    fn preprocess_joins_households_and_premises() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::from_toml("[file_locations]\nbase_path = \"data\"\nresults = \"results\"\n", dir.path())
            .unwrap();
        let lad = "E07000008";

        let households = cfg.household_demographics(lad);
        fs::create_dir_all(households.parent().unwrap()).unwrap();
        fs::write(
            &households,
            "Area,HID,PID\nE02003719,1,10\nE02003719,1,11\nE02003719,2,12\nE02003720,3,13\n",
        )
        .unwrap();

        let folder = cfg.premises_by_lad(lad);
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join("E00090001.csv"),
            "geom,mistral_function_class,floor_area,footprint_area\n\
             POINT (10 10),Residential,120,60\n\
             POINT (20 20),Retail,400,400\n",
        )
        .unwrap();

        let rows: Vec<OutputAreaRow> = [("E00090001", "E02003719"), ("E00090002", "E02003720")]
            .iter()
            .map(|(oa, msoa)| OutputAreaRow {
                oa: (*oa).to_owned(),
                msoa: (*msoa).to_owned(),
                lad: lad.to_owned(),
                region: "East of England".to_owned(),
            })
            .collect();
        let joined: Vec<(Area, MsoaArea)> = ["E02003719", "E02003720"]
            .iter()
            .map(|id| {
                let area = square(id, 0.0, 0.0, 1000.0);
                let row = MsoaArea { msoa: (*id).to_owned(), area_km2: area.area_km2(), region: "East of England".to_owned() };
                (area, row)
            })
            .collect();

        let mut problems = ProblemLog::new("preprocess");
        let records = msoa_records(&cfg, &rows, &joined, &mut problems);

        assert_eq!(records.len(), 1);
        let rec = &records[0].1;
        assert_eq!(rec.msoa, "E02003719");
        assert_eq!(rec.region, "eastofengland");
        assert_eq!((rec.population, rec.households), (3, 2));
        assert_eq!(rec.prems_residential, 1);
        assert_eq!(rec.prems_non_residential_floor_area, 400.0);
        assert_eq!(rec.geotype, geotype::Geotype::Rural);

        // E02003720 has households but no premises file
        assert_eq!(problems.len(), 1);
        problems.write(&cfg).unwrap();
        let written = fs::read_to_string(cfg.problem_areas()).unwrap();
        assert!(written.contains("E02003720"));
    }
}
