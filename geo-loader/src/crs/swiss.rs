//! Projection cylindrique conforme oblique suisse (CH1903 / CH1903+)
//!
//! Formules rigoureuses sur l'ellipsoïde de Bessel 1841 : l'ellipsoïde est
//! d'abord projeté sur une sphère conforme, puis on passe dans un système
//! pseudo-équatorial centré sur l'ancien observatoire de Berne avant
//! d'appliquer une projection de Mercator transverse.
//!
//! Les coordonnées géographiques en entrée et sortie sont dans le datum
//! CH1903 (voir [`super::datum`] pour le passage à WGS84).

use std::f64::consts::FRAC_PI_4;

use super::ellipsoid::BESSEL_1841;
use super::Geographic;

/// Latitude de l'origine (46°57'08.66")
const LAT0_DEG: f64 = 46.952_405_555_555_56;

/// Longitude de l'origine (7°26'22.50")
const LON0_DEG: f64 = 7.439_583_333_333_333;

/// Paramètres de la sphère conforme, dérivés de l'ellipsoïde et de l'origine
#[derive(Debug, Clone, Copy)]
struct Sphere {
    /// Rayon de la sphère de projection
    r: f64,
    alpha: f64,
    /// Latitude sphérique de l'origine
    b0: f64,
    k: f64,
    e: f64,
    lat0: f64,
    lon0: f64,
}

impl Sphere {
    fn bessel() -> Self {
        let a = BESSEL_1841.a;
        let e2 = BESSEL_1841.e2;
        let e = e2.sqrt();
        let lat0 = LAT0_DEG.to_radians();
        let sin0 = lat0.sin();

        let r = a * (1.0 - e2).sqrt() / (1.0 - e2 * sin0 * sin0);
        let alpha = (1.0 + e2 / (1.0 - e2) * lat0.cos().powi(4)).sqrt();
        let b0 = (sin0 / alpha).asin();
        let k = (FRAC_PI_4 + b0 / 2.0).tan().ln() - alpha * (FRAC_PI_4 + lat0 / 2.0).tan().ln()
            + alpha * e / 2.0 * ((1.0 + e * sin0) / (1.0 - e * sin0)).ln();

        Self {
            r,
            alpha,
            b0,
            k,
            e,
            lat0,
            lon0: LON0_DEG.to_radians(),
        }
    }
}

/// Projection suisse avec ses fausses origines
#[derive(Debug, Clone, Copy)]
pub struct SwissProjection {
    pub false_easting: f64,
    pub false_northing: f64,
    sphere: Sphere,
}

impl SwissProjection {
    /// CH1903+ / LV95 (EPSG:2056)
    pub fn lv95() -> Self {
        Self::with_origin(2_600_000.0, 1_200_000.0)
    }

    /// CH1903 / LV03 (EPSG:21781)
    pub fn lv03() -> Self {
        Self::with_origin(600_000.0, 200_000.0)
    }

    fn with_origin(false_easting: f64, false_northing: f64) -> Self {
        Self {
            false_easting,
            false_northing,
            sphere: Sphere::bessel(),
        }
    }

    /// Géographique (CH1903) → coordonnées projetées (E, N)
    pub fn project(&self, geo: Geographic) -> (f64, f64) {
        let s = &self.sphere;
        let sin_lat = geo.lat.sin();

        // Ellipsoïde → sphère
        let big_s = s.alpha * (FRAC_PI_4 + geo.lat / 2.0).tan().ln()
            - s.alpha * s.e / 2.0 * ((1.0 + s.e * sin_lat) / (1.0 - s.e * sin_lat)).ln()
            + s.k;
        let b = 2.0 * (big_s.exp().atan() - FRAC_PI_4);
        let l = s.alpha * (geo.lon - s.lon0);

        // Système équatorial → pseudo-équatorial
        let l_bar = l.sin().atan2(s.b0.sin() * b.tan() + s.b0.cos() * l.cos());
        let b_bar = (s.b0.cos() * b.sin() - s.b0.sin() * b.cos() * l.cos()).asin();

        let y = s.r * l_bar;
        let x = s.r / 2.0 * ((1.0 + b_bar.sin()) / (1.0 - b_bar.sin())).ln();

        (y + self.false_easting, x + self.false_northing)
    }

    /// Coordonnées projetées (E, N) → géographique (CH1903)
    pub fn unproject(&self, easting: f64, northing: f64) -> Geographic {
        let s = &self.sphere;
        let y = easting - self.false_easting;
        let x = northing - self.false_northing;

        let l_bar = y / s.r;
        let b_bar = 2.0 * ((x / s.r).exp().atan() - FRAC_PI_4);

        // Pseudo-équatorial → équatorial
        let b = (s.b0.cos() * b_bar.sin() + s.b0.sin() * b_bar.cos() * l_bar.cos()).asin();
        let l = l_bar.sin().atan2(s.b0.cos() * l_bar.cos() - s.b0.sin() * b_bar.tan());

        let lon = s.lon0 + l / s.alpha;

        // Sphère → ellipsoïde : la latitude se résout par itération
        let iso = ((FRAC_PI_4 + b / 2.0).tan().ln() - s.k) / s.alpha;
        let mut lat = b;
        for _ in 0..20 {
            let big_s = iso + s.e * (FRAC_PI_4 + (s.e * lat.sin()).asin() / 2.0).tan().ln();
            let next = 2.0 * big_s.exp().atan() - std::f64::consts::FRAC_PI_2;
            let converged = (next - lat).abs() < 1e-14;
            lat = next;
            if converged {
                break;
            }
        }

        Geographic::new(lon, lat)
    }

    /// Origine de la projection (radians)
    pub fn origin(&self) -> Geographic {
        Geographic::new(self.sphere.lon0, self.sphere.lat0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_maps_to_false_origin() {
        let lv95 = SwissProjection::lv95();
        let (e, n) = lv95.project(lv95.origin());
        assert!((e - 2_600_000.0).abs() < 1e-6, "e={}", e);
        assert!((n - 1_200_000.0).abs() < 1e-6, "n={}", n);
    }

    #[test]
    fn test_projection_roundtrip() {
        let lv03 = SwissProjection::lv03();
        for &(e, n) in &[(600_000.0, 200_000.0), (683_000.0, 248_000.0), (500_000.0, 120_000.0)] {
            let geo = lv03.unproject(e, n);
            let (e2, n2) = lv03.project(geo);
            assert!((e2 - e).abs() < 1e-4, "e={} -> {}", e, e2);
            assert!((n2 - n).abs() < 1e-4, "n={} -> {}", n, n2);
        }
    }

    #[test]
    fn test_zurich_on_bessel() {
        // Zurich ~ 8.54°E 47.37°N, LV03 environ (683 000, 247 000)
        let lv03 = SwissProjection::lv03();
        let geo = lv03.unproject(683_000.0, 247_000.0);
        let (lon, lat) = geo.to_degrees();
        assert!((lon - 8.54).abs() < 0.02, "lon={}", lon);
        assert!((lat - 47.37).abs() < 0.02, "lat={}", lat);
    }
}
