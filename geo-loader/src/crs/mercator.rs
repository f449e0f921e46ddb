//! Projection Web Mercator (EPSG:3857)
//!
//! Aussi connu sous le nom de Pseudo-Mercator ou Spherical Mercator.
//! Modèle sphérique avec le rayon équatorial WGS84.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use super::ellipsoid::WGS84;
use super::Geographic;

/// Latitude maximale représentable (emprise carrée)
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// WGS84 → Web Mercator
pub fn geographic_to_web_mercator(geo: Geographic) -> (f64, f64) {
    let r = WGS84.a;
    let max = MAX_LATITUDE.to_radians();
    let lat = geo.lat.clamp(-max, max);

    let x = r * geo.lon;
    let y = r * (FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

/// Web Mercator → WGS84
pub fn web_mercator_to_geographic(x: f64, y: f64) -> Geographic {
    let r = WGS84.a;
    let lon = x / r;
    let lat = 2.0 * (y / r).exp().atan() - FRAC_PI_2;
    Geographic::new(lon, lat)
}
