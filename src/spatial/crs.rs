//! Coordinate reference systems and reprojection to WGS84.
//!
//! Pure-Rust transforms for the systems boundary layers come in: geographic
//! WGS84 (EPSG:4326, OGC CRS84), Web Mercator (EPSG:3857) and UTM
//! (EPSG:326xx north, EPSG:327xx south). UTM uses the Snyder (1987) series
//! on the WGS84 ellipsoid.

use std::fmt;
use std::str::FromStr;

use geo::{Coord, Geometry, MapCoords};

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563; // flattening
const E2: f64 = 2.0 * F - F * F; // eccentricity squared
const E_PRIME2: f64 = E2 / (1.0 - E2); // second eccentricity squared
const K0: f64 = 0.9996; // UTM scale factor
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A CRS name that could not be parsed or is not supported.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported coordinate reference system: {0}")]
pub struct CrsError(pub String);

/// Supported coordinate reference systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// Geographic WGS84, longitude/latitude in degrees.
    Wgs84,
    /// Spherical Web Mercator in metres.
    WebMercator,
    /// Universal Transverse Mercator on WGS84.
    Utm {
        /// Zone number, 1..=60
        zone: u32,
        /// Northern hemisphere
        north: bool,
    },
}

impl Crs {
    /// Build a CRS from an EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        match code {
            4326 => Ok(Self::Wgs84),
            3857 | 900_913 => Ok(Self::WebMercator),
            32601..=32660 => Ok(Self::Utm {
                zone: code - 32600,
                north: true,
            }),
            32701..=32760 => Ok(Self::Utm {
                zone: code - 32700,
                north: false,
            }),
            _ => Err(CrsError(format!("EPSG:{code}"))),
        }
    }

    /// EPSG code of this CRS.
    #[must_use]
    pub fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
            Self::Utm { zone, north: true } => 32600 + zone,
            Self::Utm { zone, north: false } => 32700 + zone,
        }
    }

    /// OGC URN used in GeoJSON `crs` members.
    #[must_use]
    pub fn urn(self) -> String {
        format!("urn:ogc:def:crs:EPSG::{}", self.epsg())
    }

    /// Whether this is geographic WGS84.
    #[must_use]
    pub fn is_wgs84(self) -> bool {
        self == Self::Wgs84
    }

    /// Transform one coordinate into WGS84 longitude/latitude.
    #[must_use]
    pub fn to_wgs84(self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Self::Wgs84 => coord,
            Self::WebMercator => web_mercator_to_wgs84(coord),
            Self::Utm { zone, north } => utm_to_wgs84(coord, zone, north),
        }
    }

    /// Transform one WGS84 longitude/latitude into this CRS.
    #[must_use]
    pub fn from_wgs84(self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            Self::Wgs84 => coord,
            Self::WebMercator => wgs84_to_web_mercator(coord),
            Self::Utm { zone, north } => wgs84_to_utm(coord, zone, north),
        }
    }

    /// Reproject a geometry into WGS84.
    #[must_use]
    pub fn geometry_to_wgs84(self, geometry: &Geometry<f64>) -> Geometry<f64> {
        if self.is_wgs84() {
            return geometry.clone();
        }
        geometry.map_coords(|c| self.to_wgs84(c))
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::Wgs84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    /// Accepts `EPSG:4326`, `epsg:4326`, `urn:ogc:def:crs:EPSG::4326`,
    /// `urn:ogc:def:crs:EPSG:6.6:4326` and `urn:ogc:def:crs:OGC:1.3:CRS84`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let upper = name.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Self::Wgs84);
        }

        let code = if let Some(rest) = upper.strip_prefix("EPSG:") {
            rest
        } else if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            upper.rsplit(':').next().unwrap_or_default()
        } else {
            return Err(CrsError(name.to_string()));
        };

        code.parse::<u32>()
            .map_err(|_| CrsError(name.to_string()))
            .and_then(Self::from_epsg)
    }
}

fn web_mercator_to_wgs84(coord: Coord<f64>) -> Coord<f64> {
    let lon = (coord.x / A).to_degrees();
    let lat = (2.0 * (coord.y / A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    Coord { x: lon, y: lat }
}

fn wgs84_to_web_mercator(coord: Coord<f64>) -> Coord<f64> {
    let x = A * coord.x.to_radians();
    let y = A * (std::f64::consts::FRAC_PI_4 + coord.y.to_radians() / 2.0).tan().ln();
    Coord { x, y }
}

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

/// Meridional arc from equator to latitude `lat` (radians). Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

/// Snyder eqs. 8-9 and 8-10.
fn wgs84_to_utm(coord: Coord<f64>, zone: u32, north: bool) -> Coord<f64> {
    let lat = coord.y.to_radians();
    let lon = coord.x.to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - central_meridian(zone));
    let m = meridional_arc(lat);

    let a2 = a * a;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = K0
        * n
        * (a + (1.0 - t + c) * a2 * a / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    Coord {
        x: easting,
        y: if north {
            northing
        } else {
            northing + FALSE_NORTHING_SOUTH
        },
    }
}

/// Inverse via the footpoint latitude. Snyder eqs. 8-12 to 8-25.
fn utm_to_wgs84(coord: Coord<f64>, zone: u32, north: bool) -> Coord<f64> {
    let x = coord.x - FALSE_EASTING;
    let y = if north {
        coord.y
    } else {
        coord.y - FALSE_NORTHING_SOUTH
    };

    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let e1 = (1.0 - (1.0 - E2).sqrt()) / (1.0 + (1.0 - E2).sqrt());
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();

    let c1 = E_PRIME2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let n1 = A / (1.0 - E2 * sin1 * sin1).sqrt();
    let r1 = A * (1.0 - E2) / (1.0 - E2 * sin1 * sin1).powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d3 = d2 * d;
    let d4 = d3 * d;
    let d5 = d4 * d;
    let d6 = d5 * d;

    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);

    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d5
                / 120.0)
            / cos1;

    Coord {
        x: lon.to_degrees(),
        y: lat.to_degrees(),
    }
}
