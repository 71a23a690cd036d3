use crate::prj;
use anyhow::{anyhow, bail, Context, Result};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use std::fs;
use std::path::Path;

const WGS84_LONGLAT: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Re-projects native shapefile coordinates (state-plane feet for the City
/// of Chicago files) to WGS84 longitude/latitude in degrees.
pub struct Reprojector {
    definition: String,
    // None when the source is already geographic.
    source: Option<Proj>,
    wgs84: Proj,
}

impl Reprojector {
    pub fn from_proj4(definition: &str) -> Result<Self> {
        let wgs84 = Proj::from_proj_string(WGS84_LONGLAT)
            .map_err(|e| anyhow!("Failed to build WGS84 projection: {:?}", e))?;

        let source = if is_geographic(definition) {
            None
        } else {
            let proj = Proj::from_proj_string(definition)
                .map_err(|e| anyhow!("Invalid projection {:?}: {:?}", definition, e))?;
            Some(proj)
        };

        Ok(Reprojector {
            definition: definition.to_string(),
            source,
            wgs84,
        })
    }

    /// Build from an ESRI `.prj` sidecar.
    pub fn from_prj_file(path: &Path) -> Result<Self> {
        let wkt = fs::read_to_string(path)
            .with_context(|| format!("Failed to read projection file: {:?}", path))?;
        let definition = prj::esri_to_proj4(wkt.trim())
            .with_context(|| format!("Failed to interpret projection file: {:?}", path))?;
        Self::from_proj4(&definition)
    }

    pub fn geographic() -> Result<Self> {
        Self::from_proj4(WGS84_LONGLAT)
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn is_geographic(&self) -> bool {
        self.source.is_none()
    }

    /// Transform parallel x/y arrays in the source unit to longitude and
    /// latitude arrays in degrees.
    pub fn to_lon_lat(&self, xs: &[f64], ys: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        check_lengths(xs, ys)?;
        let Some(source) = &self.source else {
            return Ok((xs.to_vec(), ys.to_vec()));
        };

        let mut lons = Vec::with_capacity(xs.len());
        let mut lats = Vec::with_capacity(ys.len());
        for (&x, &y) in xs.iter().zip(ys) {
            let mut point = (x, y, 0.0);
            transform(source, &self.wgs84, &mut point)
                .map_err(|e| anyhow!("Failed to reproject ({}, {}): {:?}", x, y, e))?;
            let (lon, lat) = (point.0.to_degrees(), point.1.to_degrees());
            if !lon.is_finite() || !lat.is_finite() {
                bail!("Reprojection of ({}, {}) is not finite", x, y);
            }
            lons.push(lon);
            lats.push(lat);
        }
        Ok((lons, lats))
    }

    /// Inverse of [`Reprojector::to_lon_lat`].
    pub fn from_lon_lat(&self, lons: &[f64], lats: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        check_lengths(lons, lats)?;
        let Some(source) = &self.source else {
            return Ok((lons.to_vec(), lats.to_vec()));
        };

        let mut xs = Vec::with_capacity(lons.len());
        let mut ys = Vec::with_capacity(lats.len());
        for (&lon, &lat) in lons.iter().zip(lats) {
            let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
            transform(&self.wgs84, source, &mut point)
                .map_err(|e| anyhow!("Failed to project ({}, {}): {:?}", lon, lat, e))?;
            xs.push(point.0);
            ys.push(point.1);
        }
        Ok((xs, ys))
    }
}

fn is_geographic(definition: &str) -> bool {
    definition
        .split_whitespace()
        .any(|p| matches!(p, "+proj=longlat" | "+proj=latlong" | "+proj=lonlat" | "+proj=latlon"))
}

fn check_lengths(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        bail!("Coordinate arrays differ in length: {} vs {}", a.len(), b.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prj::tests::ILLINOIS_EAST_FTUS;

    fn chicago() -> Reprojector {
        let def = prj::esri_to_proj4(ILLINOIS_EAST_FTUS).unwrap();
        Reprojector::from_proj4(&def).unwrap()
    }

    #[test]
    fn state_plane_feet_lands_in_the_loop() {
        // Roughly State & Madison in Illinois East state-plane feet.
        let (lons, lats) = chicago().to_lon_lat(&[1_176_000.0], &[1_900_000.0]).unwrap();
        assert!(lons[0] > -87.70 && lons[0] < -87.55, "lon {}", lons[0]);
        assert!(lats[0] > 41.83 && lats[0] < 41.93, "lat {}", lats[0]);
    }

    #[test]
    fn round_trip_recovers_native_coordinates() {
        let reproj = chicago();
        let xs = [1_150_000.0, 1_176_000.0, 1_190_500.5];
        let ys = [1_830_000.0, 1_900_000.0, 1_950_250.25];
        let (lons, lats) = reproj.to_lon_lat(&xs, &ys).unwrap();
        let (xs2, ys2) = reproj.from_lon_lat(&lons, &lats).unwrap();
        for i in 0..xs.len() {
            assert!((xs[i] - xs2[i]).abs() < 0.01, "x {} vs {}", xs[i], xs2[i]);
            assert!((ys[i] - ys2[i]).abs() < 0.01, "y {} vs {}", ys[i], ys2[i]);
        }
    }

    #[test]
    fn geographic_source_is_passthrough() {
        let reproj = Reprojector::geographic().unwrap();
        assert!(reproj.is_geographic());
        let (lons, lats) = reproj.to_lon_lat(&[-87.6], &[41.9]).unwrap();
        assert_eq!((lons[0], lats[0]), (-87.6, 41.9));
    }

    #[test]
    fn mismatched_arrays_fail() {
        assert!(chicago().to_lon_lat(&[1.0, 2.0], &[1.0]).is_err());
    }
}
