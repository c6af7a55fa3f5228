use geo::Point;

use crate::error::{Error, Result};

pub const WGS84: &str = "EPSG:4326";
pub const BRITISH_NATIONAL_GRID: &str = "EPSG:27700";

/// Converts lon/lat degrees into British National Grid metres.
pub struct Reprojector {
    #[cfg(feature = "proj")]
    inner: proj::Proj,
}

impl Reprojector {
    #[cfg(feature = "proj")]
    pub fn wgs84_to_bng() -> Result<Self> {
        let inner = proj::Proj::new_known_crs(WGS84, BRITISH_NATIONAL_GRID, None)
            .map_err(|e| Error::Projection(e.to_string()))?;
        Ok(Self { inner })
    }

    #[cfg(not(feature = "proj"))]
    pub fn wgs84_to_bng() -> Result<Self> {
        Err(Error::Projection(format!(
            "built without the `proj` feature, cannot convert {} to {}",
            WGS84, BRITISH_NATIONAL_GRID
        )))
    }

    #[cfg(feature = "proj")]
    pub fn project(&self, lon: f64, lat: f64) -> Result<Point<f64>> {
        let (x, y) = self
            .inner
            .convert((lon, lat))
            .map_err(|e| Error::Projection(format!("({}, {}): {}", lon, lat, e)))?;
        Ok(Point::new(x, y))
    }

    #[cfg(not(feature = "proj"))]
    pub fn project(&self, lon: f64, lat: f64) -> Result<Point<f64>> {
        Err(Error::Projection(format!("({}, {}): no projection backend", lon, lat)))
    }
}
