//! Systèmes de coordonnées : détection et reprojection en Rust pur
//!
//! Systèmes supportés :
//! - WGS84 (EPSG:4326)
//! - CH1903+ / LV95 (EPSG:2056)
//! - CH1903 / LV03 (EPSG:21781)
//! - Web Mercator (EPSG:3857)

pub mod datum;
pub mod detect;
pub mod ellipsoid;
pub mod mercator;
pub mod swiss;
pub mod transform;

pub use detect::{detect_srid, DetectionRule, DETECTION_RULES};
pub use transform::{map_coords, valid_bounds, CoordOutcome, CoordinateTransformer, TransformedGeometry, SAFE_DEFAULT};

pub const SRID_WGS84: u32 = 4326;
pub const SRID_LV95: u32 = 2056;
pub const SRID_LV03: u32 = 21781;
pub const SRID_WEB_MERCATOR: u32 = 3857;

/// Vérifie si un SRID est géré par le transformateur intégré
pub fn is_supported(srid: u32) -> bool {
    matches!(srid, SRID_WGS84 | SRID_LV95 | SRID_LV03 | SRID_WEB_MERCATOR)
}

/// Libellé lisible d'un SRID
pub fn srid_label(srid: u32) -> &'static str {
    match srid {
        SRID_WGS84 => "WGS 84",
        SRID_LV95 => "CH1903+ / LV95",
        SRID_LV03 => "CH1903 / LV03",
        SRID_WEB_MERCATOR => "WGS 84 / Pseudo-Mercator",
        _ => "unknown",
    }
}

/// Point en coordonnées géographiques (radians)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geographic {
    /// Longitude en radians
    pub lon: f64,
    /// Latitude en radians
    pub lat: f64,
}

impl Geographic {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Convertit en degrés
    pub fn to_degrees(self) -> (f64, f64) {
        (self.lon.to_degrees(), self.lat.to_degrees())
    }

    /// Crée depuis des degrés
    pub fn from_degrees(lon_deg: f64, lat_deg: f64) -> Self {
        Self {
            lon: lon_deg.to_radians(),
            lat: lat_deg.to_radians(),
        }
    }
}
