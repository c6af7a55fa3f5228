use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{area::AreaKind, config::Config};

pub mod area;
pub mod buffer;
pub mod buildings;
pub mod codepoint;
pub mod config;
pub mod error;
pub mod geotype;
pub mod grid;
pub mod jobs;
pub mod kml;
pub mod observation;
pub mod output;
pub mod overlay;
pub mod preprocess;
pub mod project;
pub mod sector;
pub mod shapes;
pub mod trajectory;

#[derive(Parser)]
#[command(name = "apdensity", version, about = "Wi-Fi access point density against premises and census data")]
struct Cli {
    /// Path to the TOML file holding `[file_locations]`
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build MSOA boundaries and the MSOA statistics lookup
    Preprocess,
    /// Parse the KML exports into the collected points table
    Collect {
        /// Re-read the KML even if the table exists
        #[arg(long)]
        refresh: bool,
    },
    /// List the areas that hold at least one collected AP
    ListAreas {
        #[arg(long, value_enum, default_value = "sector")]
        kind: AreaKind,
    },
    /// Split each LAD's premises into one file per listed area
    SplitBuildings {
        #[arg(long, value_enum, default_value = "sector")]
        kind: AreaKind,
        #[arg(long)]
        only: Option<String>,
    },
    /// Square grid density per postcode sector
    Grid {
        #[arg(long, value_delimiter = ',', default_value = "100,300")]
        sizes: Vec<u32>,
        #[arg(long)]
        only: Option<String>,
    },
    /// Density in buffers drawn around AP clusters
    Buffer {
        #[arg(long, value_enum, default_value = "sector")]
        kind: AreaKind,
        #[arg(long, value_delimiter = ',', default_value = "200,300,400")]
        sizes: Vec<u32>,
        #[arg(long)]
        only: Option<String>,
    },
    /// Grid density against Code-Point delivery points
    Rmdp {
        #[arg(long, default_value_t = 50)]
        size: u32,
        #[arg(long)]
        only: Option<String>,
    },
    /// Sector AP density from WiGLE API dumps
    SectorDensity,
    /// Write sector boundaries joined with their geotypes
    SectorShapes,
    /// Count AP captures between consecutive GPS fixes
    Trajectory {
        #[arg(long)]
        gps: Option<PathBuf>,
        #[arg(long)]
        captures: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("loading config from {:?}", cli.config))?;

    match cli.command {
        Command::Preprocess => jobs::preprocess(&config)?,
        Command::Collect { refresh } => jobs::collect(&config, refresh)?,
        Command::ListAreas { kind } => jobs::list_areas(&config, kind)?,
        Command::SplitBuildings { kind, only } => jobs::split_buildings(&config, kind, only.as_deref())?,
        Command::Grid { sizes, only } => jobs::grid(&config, &sizes, only.as_deref())?,
        Command::Buffer { kind, sizes, only } => jobs::buffer(&config, kind, &sizes, only.as_deref())?,
        Command::Rmdp { size, only } => jobs::rmdp(&config, size, only.as_deref())?,
        Command::SectorDensity => jobs::sector_density(&config)?,
        Command::SectorShapes => jobs::sector_shapes(&config)?,
        Command::Trajectory { gps, captures, output } => {
            jobs::trajectory(&config, gps.as_deref(), captures.as_deref(), output.as_deref())?
        }
    }

    Ok(())
}
