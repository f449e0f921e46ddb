//! Définitions des ellipsoïdes et conversions géocentriques

use super::Geographic;

/// Ellipsoïde de référence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Demi-grand axe en mètres
    pub a: f64,
    /// Première excentricité au carré
    pub e2: f64,
}

/// Ellipsoïde WGS84
pub const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    e2: 0.006_694_379_990_141_317,
};

/// Ellipsoïde de Bessel 1841 (CH1903 / CH1903+)
pub const BESSEL_1841: Ellipsoid = Ellipsoid {
    a: 6_377_397.155,
    e2: 0.006_674_372_230_614,
};

/// Point géocentrique (ECEF) en mètres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geocentric {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Ellipsoid {
    /// Première excentricité
    pub fn e(&self) -> f64 {
        self.e2.sqrt()
    }

    /// Rayon de courbure dans le premier vertical
    #[inline]
    fn prime_vertical_radius(&self, lat: f64) -> f64 {
        let sin = lat.sin();
        self.a / (1.0 - self.e2 * sin * sin).sqrt()
    }

    /// Géographique + hauteur ellipsoïdale → géocentrique
    pub fn to_geocentric(&self, geo: Geographic, h: f64) -> Geocentric {
        let n = self.prime_vertical_radius(geo.lat);
        let (sin_lat, cos_lat) = geo.lat.sin_cos();
        let (sin_lon, cos_lon) = geo.lon.sin_cos();
        Geocentric {
            x: (n + h) * cos_lat * cos_lon,
            y: (n + h) * cos_lat * sin_lon,
            z: (n * (1.0 - self.e2) + h) * sin_lat,
        }
    }

    /// Géocentrique → géographique + hauteur ellipsoïdale (itératif)
    pub fn to_geographic(&self, p: Geocentric) -> (Geographic, f64) {
        let lon = p.y.atan2(p.x);
        let rho = p.x.hypot(p.y);
        let mut lat = p.z.atan2(rho * (1.0 - self.e2));
        let mut h = 0.0;

        for _ in 0..16 {
            let n = self.prime_vertical_radius(lat);
            h = rho / lat.cos() - n;
            let next = p.z.atan2(rho * (1.0 - self.e2 * n / (n + h)));
            let converged = (next - lat).abs() < 1e-14;
            lat = next;
            if converged {
                break;
            }
        }

        (Geographic::new(lon, lat), h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geocentric_roundtrip() {
        let geo = Geographic::from_degrees(7.4386, 46.9511);
        let p = BESSEL_1841.to_geocentric(geo, 560.0);
        let (back, h) = BESSEL_1841.to_geographic(p);

        assert!((back.lon - geo.lon).abs() < 1e-12);
        assert!((back.lat - geo.lat).abs() < 1e-12);
        assert!((h - 560.0).abs() < 1e-6, "h={}", h);
    }

    #[test]
    fn test_wgs84_eccentricity() {
        let f = 1.0 / 298.257_223_563;
        assert!((WGS84.e2 - (2.0 * f - f * f)).abs() < 1e-15);
    }
}
