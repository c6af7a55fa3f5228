use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{Error, IoContext, Result};

pub const DEFAULT_CONFIG: &str = "script_config.toml";

#[derive(Debug, Deserialize, Clone)]
struct RawConfig {
    file_locations: FileLocations,
}

#[derive(Debug, Deserialize, Clone)]
struct FileLocations {
    base_path: PathBuf,
    results: Option<PathBuf>,
}

/// Resolved filesystem layout for every job.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_path: PathBuf,
    pub results: PathBuf,
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).at(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml(&content, dir)
    }

    /// Parses config text; relative paths resolve against `dir`.
    pub fn from_toml(content: &str, dir: &Path) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        let base_path = resolve(dir, &raw.file_locations.base_path);
        let results = match &raw.file_locations.results {
            Some(p) => resolve(dir, p),
            None => base_path.join("..").join("results"),
        };

        Ok(Self { base_path, results })
    }

    pub fn kml_folder(&self) -> PathBuf {
        self.base_path.join("wigle").join("all_kml_data")
    }

    pub fn api_sector_folder(&self) -> PathBuf {
        self.base_path.join("wigle").join("postcode_sectors")
    }

    pub fn intermediate(&self) -> PathBuf {
        self.base_path.join("intermediate")
    }

    pub fn collected_points(&self) -> PathBuf {
        self.intermediate().join("all_collected_points.csv")
    }

    pub fn shapes(&self) -> PathBuf {
        self.base_path.join("shapes")
    }

    pub fn sector_shapes(&self) -> PathBuf {
        self.shapes().join("PostalSector.shp")
    }

    pub fn lad_shapes(&self) -> PathBuf {
        self.shapes().join("lad_uk_2016-12.shp")
    }

    /// MSOA and Scottish intermediate zone boundaries written by `preprocess`.
    pub fn msoa_shapes(&self) -> PathBuf {
        self.intermediate().join("output_areas.geojson")
    }

    pub fn msoa_areas_table(&self) -> PathBuf {
        self.intermediate().join("output_areas.csv")
    }

    pub fn msoa_shapes_with_data(&self) -> PathBuf {
        self.intermediate().join("oa_shapes_with_data.geojson")
    }

    pub fn ew_msoa_boundaries(&self) -> PathBuf {
        self.base_path
            .join("msoa_shapes")
            .join("Middle_Layer_Super_Output_Areas__December_2011__Boundaries.shp")
    }

    pub fn scottish_iz_boundaries(&self) -> PathBuf {
        self.base_path
            .join("scottish_iz_shapes")
            .join("SG_IntermediateZone_Bdry_2011.shp")
    }

    /// Output area to LSOA, MSOA and LAD lookup.
    pub fn output_area_lookup(&self) -> PathBuf {
        self.base_path.join("oa_lut").join(
            "Output_Area_to_LSOA_to_MSOA_to_Local_Authority_District__December_2017__Lookup_with_Area_Classifications_in_Great_Britain.csv",
        )
    }

    pub fn household_demographics(&self, lad: &str) -> PathBuf {
        self.base_path
            .join("hh_demographics_msoa_2018")
            .join(format!("ass_{}_MSOA11_2018.csv", lad))
    }

    pub fn sector_geotypes(&self) -> PathBuf {
        self.base_path
            .join("pcd_sector_geotypes")
            .join("pcd_sector_geotypes.csv")
    }

    pub fn msoa_lookup(&self) -> PathBuf {
        self.intermediate().join("oa_lookup.csv")
    }

    /// Raw premises, one folder of WKT CSV (or GeoJSON/shapefile) files per LAD.
    pub fn premises_by_lad(&self, lad: &str) -> PathBuf {
        self.base_path.join("prems_by_lad").join(lad)
    }

    /// Buildings already split into one file per area.
    pub fn area_buildings(&self, lad: &str, area_id: &str) -> PathBuf {
        self.intermediate()
            .join("prems")
            .join(lad)
            .join(format!("{}.geojson", area_id))
    }

    pub fn codepoint_shapes(&self, postcode_area: &str) -> PathBuf {
        self.base_path
            .join("codepoint")
            .join("shapes")
            .join(format!("{}.shp", postcode_area))
    }

    pub fn codepoint_vertical_lookup(&self, postcode_area: &str) -> PathBuf {
        self.base_path
            .join("codepoint")
            .join("shapes")
            .join(format!("{}_vstreet_lookup.txt", postcode_area))
    }

    pub fn codepoint_counts(&self, postcode_area: &str) -> PathBuf {
        self.base_path
            .join("codepoint")
            .join("csvs")
            .join(format!("{}.csv", postcode_area))
    }

    pub fn domestic_delivery_points(&self) -> PathBuf {
        self.base_path
            .join("codepoint")
            .join("domestic_delivery_points.csv")
    }

    pub fn gps_trajectories(&self) -> PathBuf {
        self.base_path.join("gps_trajectories.csv")
    }

    pub fn drive_captures(&self) -> PathBuf {
        self.base_path.join("test_drive_1.csv")
    }

    pub fn sector_shapes_output(&self) -> PathBuf {
        self.intermediate().join("pcd_sector_shapes.geojson")
    }

    pub fn problem_areas(&self) -> PathBuf {
        self.results.join("problem_areas.csv")
    }

    pub fn area_results(&self, area_id: &str) -> PathBuf {
        self.results.join(area_id)
    }
}

fn resolve(dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        dir.join(p)
    }
}
