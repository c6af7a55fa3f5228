use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("failed to parse kml {path:?}: {source}")]
    Kml {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },

    #[error(transparent)]
    Shapefile(#[from] shapefile::Error),

    #[error(transparent)]
    GeoJson(#[from] geojson::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("missing data: {0}")]
    MissingData(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches the offending path to an io error.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io { path: path.into(), source })
    }
}
