//! Changement de datum CH1903 ↔ WGS84
//!
//! Translation géocentrique à trois paramètres. Le sens inverse est résolu
//! par itération sur le sens direct, ce qui ferme l'aller-retour au
//! millimètre près même en ignorant la hauteur ellipsoïdale.

use super::ellipsoid::{Geocentric, BESSEL_1841, WGS84};
use super::Geographic;

/// Translation CH1903 → WGS84 en mètres (dx, dy, dz)
pub const CH1903_TO_WGS84: [f64; 3] = [674.374, 15.056, 405.346];

/// CH1903 (Bessel) → WGS84
pub fn ch1903_to_wgs84(geo: Geographic) -> Geographic {
    let p = BESSEL_1841.to_geocentric(geo, 0.0);
    let shifted = Geocentric {
        x: p.x + CH1903_TO_WGS84[0],
        y: p.y + CH1903_TO_WGS84[1],
        z: p.z + CH1903_TO_WGS84[2],
    };
    WGS84.to_geographic(shifted).0
}

/// Translation inverse directe (première approximation)
fn wgs84_to_ch1903_direct(geo: Geographic) -> Geographic {
    let p = WGS84.to_geocentric(geo, 0.0);
    let shifted = Geocentric {
        x: p.x - CH1903_TO_WGS84[0],
        y: p.y - CH1903_TO_WGS84[1],
        z: p.z - CH1903_TO_WGS84[2],
    };
    BESSEL_1841.to_geographic(shifted).0
}

/// WGS84 → CH1903 (Bessel)
pub fn wgs84_to_ch1903(geo: Geographic) -> Geographic {
    let mut guess = wgs84_to_ch1903_direct(geo);
    for _ in 0..8 {
        let forward = ch1903_to_wgs84(guess);
        let d_lon = geo.lon - forward.lon;
        let d_lat = geo.lat - forward.lat;
        guess = Geographic::new(guess.lon + d_lon, guess.lat + d_lat);
        if d_lon.abs() < 1e-15 && d_lat.abs() < 1e-15 {
            break;
        }
    }
    guess
}
