//! Reprojection des géométries entre les systèmes supportés
//!
//! Chaque tuple est contrôlé en entrée (plage plausible du système source) et
//! en sortie (emprise valide du système cible). Un tuple rejeté est retenté
//! avec X et Y inversés, puis remplacé par un point de repli connu (Berne)
//! exprimé dans le système cible. La reprojection ne fait jamais échouer un
//! import : les échecs sont comptés.

use geo::{Coord, Geometry, GeometryCollection, Line, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde_json::json;
use tracing::{debug, warn};

use super::mercator::{geographic_to_web_mercator, web_mercator_to_geographic};
use super::swiss::SwissProjection;
use super::{datum, Geographic, SRID_LV03, SRID_LV95, SRID_WEB_MERCATOR, SRID_WGS84};
use crate::bounds::Bounds;
use crate::error::{LoaderError, Result};
use crate::stats::IssueKind;
use crate::types::{CanonicalFeature, Dataset};

/// Point de repli (Berne), en degrés WGS84 (lon, lat)
pub const SAFE_DEFAULT: (f64, f64) = (7.4386, 46.9511);

/// Emprise valide d'un système supporté
pub fn valid_bounds(srid: u32) -> Option<Bounds> {
    match srid {
        SRID_WGS84 => Some(Bounds::WORLD),
        SRID_WEB_MERCATOR => Some(Bounds::WORLD_WEB_MERCATOR),
        SRID_LV95 => Some(Bounds::new(2_400_000.0, 1_000_000.0, 2_900_000.0, 1_400_000.0)),
        SRID_LV03 => Some(Bounds::new(400_000.0, 0.0, 900_000.0, 400_000.0)),
        _ => None,
    }
}

/// Système de coordonnées résolu
#[derive(Debug, Clone, Copy)]
enum Crs {
    Wgs84,
    WebMercator,
    /// Projection suisse (coordonnées géographiques en CH1903)
    Swiss(SwissProjection),
}

impl Crs {
    fn resolve(srid: u32) -> Result<Self> {
        match srid {
            SRID_WGS84 => Ok(Self::Wgs84),
            SRID_WEB_MERCATOR => Ok(Self::WebMercator),
            SRID_LV95 => Ok(Self::Swiss(SwissProjection::lv95())),
            SRID_LV03 => Ok(Self::Swiss(SwissProjection::lv03())),
            other => Err(LoaderError::UnsupportedSrid(other)),
        }
    }

    fn to_wgs84(&self, x: f64, y: f64) -> Geographic {
        match self {
            Self::Wgs84 => Geographic::from_degrees(x, y),
            Self::WebMercator => web_mercator_to_geographic(x, y),
            Self::Swiss(projection) => datum::ch1903_to_wgs84(projection.unproject(x, y)),
        }
    }

    fn from_wgs84(&self, geo: Geographic) -> (f64, f64) {
        match self {
            Self::Wgs84 => geo.to_degrees(),
            Self::WebMercator => geographic_to_web_mercator(geo),
            Self::Swiss(projection) => projection.project(datum::wgs84_to_ch1903(geo)),
        }
    }
}

/// Issue de la transformation d'un tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordOutcome {
    Direct,
    /// Réussi après inversion X/Y
    Swapped,
    /// Remplacé par le point de repli
    Fallback,
}

/// Géométrie reprojetée et compteurs associés
#[derive(Debug, Clone)]
pub struct TransformedGeometry {
    pub geometry: Geometry,
    pub swapped: usize,
    pub failures: usize,
}

/// Transformateur de coordonnées entre deux SRID supportés
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    source_srid: u32,
    target_srid: u32,
    source: Crs,
    target: Crs,
    source_bounds: Bounds,
    target_bounds: Bounds,
    safe_default: Coord,
}

impl CoordinateTransformer {
    /// Crée un transformateur (4326, 2056, 21781 et 3857 dans tous les sens)
    pub fn new(source_srid: u32, target_srid: u32) -> Result<Self> {
        let source = Crs::resolve(source_srid)?;
        let target = Crs::resolve(target_srid)?;
        let source_bounds = valid_bounds(source_srid).ok_or(LoaderError::UnsupportedSrid(source_srid))?;
        let target_bounds = valid_bounds(target_srid).ok_or(LoaderError::UnsupportedSrid(target_srid))?;

        let (x, y) = target.from_wgs84(Geographic::from_degrees(SAFE_DEFAULT.0, SAFE_DEFAULT.1));

        Ok(Self {
            source_srid,
            target_srid,
            source,
            target,
            source_bounds,
            target_bounds,
            safe_default: Coord { x, y },
        })
    }

    pub fn source_srid(&self) -> u32 {
        self.source_srid
    }

    pub fn target_srid(&self) -> u32 {
        self.target_srid
    }

    pub fn is_identity(&self) -> bool {
        self.source_srid == self.target_srid
    }

    /// Point de repli exprimé dans le système cible
    pub fn safe_default(&self) -> Coord {
        self.safe_default
    }

    fn try_transform(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() || !self.source_bounds.contains(x, y) {
            return None;
        }
        let (ox, oy) = self.target.from_wgs84(self.source.to_wgs84(x, y));
        (ox.is_finite() && oy.is_finite() && self.target_bounds.contains(ox, oy)).then_some((ox, oy))
    }

    /// Transforme un tuple sans jamais échouer
    pub fn transform_coord(&self, coord: Coord) -> (Coord, CoordOutcome) {
        if self.is_identity() {
            return (coord, CoordOutcome::Direct);
        }
        if let Some((x, y)) = self.try_transform(coord.x, coord.y) {
            return (Coord { x, y }, CoordOutcome::Direct);
        }
        if let Some((x, y)) = self.try_transform(coord.y, coord.x) {
            debug!(x = coord.x, y = coord.y, "Coordinate transformed after axis swap");
            return (Coord { x, y }, CoordOutcome::Swapped);
        }
        debug!(
            x = coord.x,
            y = coord.y,
            source = self.source_srid,
            target = self.target_srid,
            "Coordinate out of range, using safe default"
        );
        (self.safe_default, CoordOutcome::Fallback)
    }

    /// Transforme un tuple (x, y), ou `None` s'il est hors plage dans les deux ordres
    pub fn transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if self.is_identity() {
            return Some((x, y));
        }
        self.try_transform(x, y).or_else(|| self.try_transform(y, x))
    }

    /// Transforme récursivement toutes les coordonnées d'une géométrie
    pub fn transform_geometry(&self, geometry: &Geometry) -> TransformedGeometry {
        let mut swapped = 0;
        let mut failures = 0;
        let geometry = map_coords(geometry, &mut |coord| {
            let (out, outcome) = self.transform_coord(coord);
            match outcome {
                CoordOutcome::Direct => {}
                CoordOutcome::Swapped => swapped += 1,
                CoordOutcome::Fallback => failures += 1,
            }
            out
        });
        TransformedGeometry {
            geometry,
            swapped,
            failures,
        }
    }

    /// Produit une copie reprojetée d'un dataset
    ///
    /// Le dataset source n'est jamais modifié. Les échecs sont ajoutés aux
    /// statistiques de la copie.
    pub fn transform_dataset(&self, dataset: &Dataset) -> Dataset {
        let mut stats = dataset.stats.clone();
        let features: Vec<CanonicalFeature> = dataset
            .features
            .iter()
            .map(|feature| {
                let transformed = self.transform_geometry(&feature.geometry);
                if transformed.failures > 0 {
                    warn!(
                        feature_id = feature.id,
                        failures = transformed.failures,
                        source = self.source_srid,
                        target = self.target_srid,
                        "Reprojection fell back to safe default"
                    );
                    stats.record_failed_transformations(transformed.failures);
                    stats.issue(
                        IssueKind::TransformFailed,
                        format!(
                            "{} coordinate(s) of feature {} could not be reprojected",
                            transformed.failures, feature.id
                        ),
                        json!({"featureId": feature.id, "failures": transformed.failures}),
                    );
                }
                CanonicalFeature {
                    geometry: transformed.geometry,
                    ..feature.clone()
                }
            })
            .collect();

        Dataset::new(features, Some(self.target_srid), stats)
    }
}

fn map_line_string(line: &LineString, f: &mut impl FnMut(Coord) -> Coord) -> LineString {
    LineString::new(line.coords().map(|c| f(*c)).collect())
}

fn map_polygon(polygon: &Polygon, f: &mut impl FnMut(Coord) -> Coord) -> Polygon {
    let exterior = map_line_string(polygon.exterior(), f);
    let interiors = polygon
        .interiors()
        .iter()
        .map(|ring| map_line_string(ring, f))
        .collect();
    Polygon::new(exterior, interiors)
}

/// Applique une fonction à chaque coordonnée, récursivement
///
/// `Rect` et `Triangle` ressortent en `Polygon` : une rotation ou une
/// reprojection ne conserve pas leur forme.
pub fn map_coords(geometry: &Geometry, f: &mut impl FnMut(Coord) -> Coord) -> Geometry {
    match geometry {
        Geometry::Point(p) => Geometry::Point(Point(f(p.0))),
        Geometry::Line(l) => Geometry::Line(Line::new(f(l.start), f(l.end))),
        Geometry::LineString(ls) => Geometry::LineString(map_line_string(ls, f)),
        Geometry::Polygon(p) => Geometry::Polygon(map_polygon(p, f)),
        Geometry::MultiPoint(mp) => {
            Geometry::MultiPoint(MultiPoint::new(mp.iter().map(|p| Point(f(p.0))).collect()))
        }
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString::new(
            mls.iter().map(|ls| map_line_string(ls, f)).collect(),
        )),
        Geometry::MultiPolygon(mp) => {
            Geometry::MultiPolygon(MultiPolygon::new(mp.iter().map(|p| map_polygon(p, f)).collect()))
        }
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection(
            gc.iter().map(|member| map_coords(member, f)).collect(),
        )),
        Geometry::Rect(r) => Geometry::Polygon(map_polygon(&r.to_polygon(), f)),
        Geometry::Triangle(t) => Geometry::Polygon(map_polygon(&t.to_polygon(), f)),
    }
}
