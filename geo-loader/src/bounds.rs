//! Calcul d'emprise incrémental
//!
//! L'accumulateur parcourt récursivement toutes les variantes de géométrie, y
//! compris les `GeometryCollection` imbriquées, et ignore les ordonnées non
//! finies. Une emprise vide ne sort jamais en NaN/Infinity : on retombe sur un
//! rectangle par défaut adapté au système de coordonnées.

use geo::{Coord, Geometry, LineString, Polygon};
use serde::{Serialize, Serializer};

use crate::crs::{SRID_LV03, SRID_LV95, SRID_WEB_MERCATOR};

/// Rectangle englobant [minX, minY, maxX, maxY]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Emprise monde en coordonnées géographiques
    pub const WORLD: Bounds = Bounds::new(-180.0, -90.0, 180.0, 90.0);

    /// Emprise suisse en LV95 (EPSG:2056)
    pub const SWITZERLAND_LV95: Bounds = Bounds::new(2_485_000.0, 1_075_000.0, 2_834_000.0, 1_296_000.0);

    /// Emprise suisse en LV03 (EPSG:21781)
    pub const SWITZERLAND_LV03: Bounds = Bounds::new(485_000.0, 75_000.0, 834_000.0, 296_000.0);

    /// Emprise monde en Web Mercator (EPSG:3857)
    pub const WORLD_WEB_MERCATOR: Bounds = Bounds::new(
        -20_037_508.342_789_244,
        -20_037_508.342_789_244,
        20_037_508.342_789_244,
        20_037_508.342_789_244,
    );

    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Rectangle par défaut pour un système de coordonnées
    ///
    /// Utilisé quand aucune coordonnée finie n'a été vue.
    pub fn default_for(srid: Option<u32>) -> Self {
        match srid {
            Some(SRID_LV95) => Self::SWITZERLAND_LV95,
            Some(SRID_LV03) => Self::SWITZERLAND_LV03,
            Some(SRID_WEB_MERCATOR) => Self::WORLD_WEB_MERCATOR,
            _ => Self::WORLD,
        }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Vérifie que l'emprise est finie et ordonnée
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Union de deux emprises
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }
}

impl Serialize for Bounds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_array().serialize(serializer)
    }
}

/// Accumulateur min/max courant
#[derive(Debug, Clone, Copy)]
pub struct BoundsAccumulator {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
    count: usize,
}

impl Default for BoundsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundsAccumulator {
    pub fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
            count: 0,
        }
    }

    /// Nombre de coordonnées finies prises en compte
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn add_xy(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.count += 1;
    }

    #[inline]
    pub fn add_coord(&mut self, coord: Coord) {
        self.add_xy(coord.x, coord.y);
    }

    fn add_line_string(&mut self, line: &LineString) {
        for coord in line.coords() {
            self.add_coord(*coord);
        }
    }

    fn add_polygon(&mut self, polygon: &Polygon) {
        self.add_line_string(polygon.exterior());
        for interior in polygon.interiors() {
            self.add_line_string(interior);
        }
    }

    /// Ajoute une géométrie (récursif sur les collections)
    pub fn add_geometry(&mut self, geometry: &Geometry) {
        match geometry {
            Geometry::Point(p) => self.add_coord(p.0),
            Geometry::Line(l) => {
                self.add_coord(l.start);
                self.add_coord(l.end);
            }
            Geometry::LineString(ls) => self.add_line_string(ls),
            Geometry::Polygon(p) => self.add_polygon(p),
            Geometry::MultiPoint(mp) => {
                for p in mp.iter() {
                    self.add_coord(p.0);
                }
            }
            Geometry::MultiLineString(mls) => {
                for ls in mls.iter() {
                    self.add_line_string(ls);
                }
            }
            Geometry::MultiPolygon(mp) => {
                for p in mp.iter() {
                    self.add_polygon(p);
                }
            }
            Geometry::GeometryCollection(gc) => {
                for member in gc.iter() {
                    self.add_geometry(member);
                }
            }
            Geometry::Rect(r) => {
                self.add_coord(r.min());
                self.add_coord(r.max());
            }
            Geometry::Triangle(t) => {
                for vertex in t.to_array() {
                    self.add_coord(vertex);
                }
            }
        }
    }

    /// Fusionne un autre accumulateur (emprise d'un chunk)
    pub fn merge(&mut self, other: &BoundsAccumulator) {
        if other.is_empty() {
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
        self.count += other.count;
    }

    /// Emprise courante, ou `None` si aucune coordonnée finie
    pub fn current(&self) -> Option<Bounds> {
        (!self.is_empty()).then(|| Bounds::new(self.min_x, self.min_y, self.max_x, self.max_y))
    }

    /// Emprise finale, avec repli sur le rectangle par défaut du SRID
    pub fn finish(&self, srid: Option<u32>) -> Bounds {
        self.current().unwrap_or_else(|| Bounds::default_for(srid))
    }
}

/// Emprise d'une géométrie isolée
pub fn geometry_bounds(geometry: &Geometry) -> Option<Bounds> {
    let mut acc = BoundsAccumulator::new();
    acc.add_geometry(geometry);
    acc.current()
}
