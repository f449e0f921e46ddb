//! Entités DXF typées et conversion en géométries

use geo::{Coord, Geometry, LineString, Point, Polygon};
use serde_json::{json, Value};

use super::tessellate::{arc_points, circle_ring, ellipse_points, is_full_turn};
use super::tokenizer::Pair;
use crate::stats::{IssueKind, ProcessingIssue};
use crate::types::{Properties, ValidationFlags};

/// Calque par défaut d'une entité sans code 8
pub const DEFAULT_LAYER: &str = "0";

/// Géométrie source d'une entité
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coord),
    Line(Coord, Coord),
    Polyline {
        vertices: Vec<Coord>,
        closed: bool,
    },
    Circle {
        center: Coord,
        radius: f64,
    },
    /// Angles en degrés
    Arc {
        center: Coord,
        radius: f64,
        start: f64,
        end: f64,
    },
    /// `major` relatif au centre, paramètres en radians
    Ellipse {
        center: Coord,
        major: Coord,
        ratio: f64,
        start: f64,
        end: f64,
    },
    Spline {
        control: Vec<Coord>,
        fit: Vec<Coord>,
    },
    Text {
        at: Coord,
        text: String,
    },
    Insert {
        block: String,
        at: Coord,
        scale_x: f64,
        scale_y: f64,
        /// Degrés
        rotation: f64,
        attributes: Vec<(String, String)>,
    },
    Unsupported,
}

/// Entité lue dans une section ENTITIES ou un bloc
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Type DXF en majuscules (LINE, LWPOLYLINE...)
    pub kind: String,
    pub layer: String,
    pub handle: Option<String>,
    pub shape: Shape,
    /// Taille approximative dans la source (octets)
    pub size: usize,
}

fn value_of<'a>(record: &[Pair<'a>], code: i32) -> Option<&'a str> {
    record.iter().find(|p| p.code == code).map(|p| p.value)
}

fn float_of(record: &[Pair], code: i32, default: f64) -> f64 {
    record.iter().find(|p| p.code == code).map_or(default, Pair::float)
}

/// Coordonnée (x, y) portée par les codes `x_code` et `x_code + 10`
fn coord_of(record: &[Pair], x_code: i32) -> Coord {
    Coord {
        x: float_of(record, x_code, 0.0),
        y: float_of(record, x_code + 10, 0.0),
    }
}

/// Toutes les coordonnées répétées d'un code (sommets, points de contrôle)
fn coords_of(record: &[Pair], x_code: i32) -> Vec<Coord> {
    let mut coords = Vec::new();
    for pair in record {
        if pair.code == x_code {
            coords.push(Coord {
                x: pair.float(),
                y: f64::NAN,
            });
        } else if pair.code == x_code + 10 {
            if let Some(last) = coords.last_mut() {
                last.y = pair.float();
            }
        }
    }
    coords
}

fn record_size(record: &[Pair]) -> usize {
    record.iter().map(|p| p.value.len() + 8).sum()
}

impl Entity {
    /// Construit une entité depuis un enregistrement (première paire = type)
    pub fn from_record(record: &[Pair]) -> Self {
        let kind = record.first().map(|p| p.value.to_ascii_uppercase()).unwrap_or_default();
        let flags = value_of(record, 70).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);

        let shape = match kind.as_str() {
            "POINT" => Shape::Point(coord_of(record, 10)),
            "LINE" => Shape::Line(coord_of(record, 10), coord_of(record, 11)),
            "LWPOLYLINE" => Shape::Polyline {
                vertices: coords_of(record, 10),
                closed: flags & 1 == 1,
            },
            // Sommets ajoutés ensuite par les VERTEX
            "POLYLINE" => Shape::Polyline {
                vertices: Vec::new(),
                closed: flags & 1 == 1,
            },
            "CIRCLE" => Shape::Circle {
                center: coord_of(record, 10),
                radius: float_of(record, 40, f64::NAN),
            },
            "ARC" => Shape::Arc {
                center: coord_of(record, 10),
                radius: float_of(record, 40, f64::NAN),
                start: float_of(record, 50, 0.0),
                end: float_of(record, 51, 360.0),
            },
            "ELLIPSE" => Shape::Ellipse {
                center: coord_of(record, 10),
                major: coord_of(record, 11),
                ratio: float_of(record, 40, 1.0),
                start: float_of(record, 41, 0.0),
                end: float_of(record, 42, std::f64::consts::TAU),
            },
            "SPLINE" => Shape::Spline {
                control: coords_of(record, 10),
                fit: coords_of(record, 11),
            },
            "TEXT" => Shape::Text {
                at: coord_of(record, 10),
                text: value_of(record, 1).unwrap_or_default().to_string(),
            },
            "MTEXT" => {
                // Le texte long est découpé en codes 3 suivis du code 1 final
                let mut text: String = record.iter().filter(|p| p.code == 3).map(|p| p.value).collect();
                text.push_str(value_of(record, 1).unwrap_or_default());
                Shape::Text {
                    at: coord_of(record, 10),
                    text,
                }
            }
            "INSERT" => Shape::Insert {
                block: value_of(record, 2).unwrap_or_default().to_string(),
                at: coord_of(record, 10),
                scale_x: float_of(record, 41, 1.0),
                scale_y: float_of(record, 42, 1.0),
                rotation: float_of(record, 50, 0.0),
                attributes: Vec::new(),
            },
            _ => Shape::Unsupported,
        };

        Self {
            kind,
            layer: value_of(record, 8).unwrap_or(DEFAULT_LAYER).to_string(),
            handle: value_of(record, 5).map(str::to_string),
            shape,
            size: record_size(record),
        }
    }

    /// Rattache un enregistrement subordonné (VERTEX, ATTRIB)
    pub fn attach(&mut self, record: &[Pair]) {
        let kind = record.first().map(|p| p.value).unwrap_or_default();
        self.size += record_size(record);
        match &mut self.shape {
            Shape::Polyline { vertices, .. } if kind.eq_ignore_ascii_case("VERTEX") => {
                vertices.push(coord_of(record, 10));
            }
            Shape::Insert { attributes, .. } if kind.eq_ignore_ascii_case("ATTRIB") => {
                if let Some(tag) = value_of(record, 2) {
                    attributes.push((tag.to_string(), value_of(record, 1).unwrap_or_default().to_string()));
                }
            }
            _ => {}
        }
    }

    /// Indique si l'entité attend des VERTEX/ATTRIB jusqu'à un SEQEND
    pub fn expects_children(&self, record: &[Pair]) -> bool {
        match self.shape {
            Shape::Polyline { .. } => self.kind == "POLYLINE",
            Shape::Insert { .. } => value_of(record, 66).is_some_and(|v| v.trim() == "1"),
            _ => false,
        }
    }

    /// Propriétés communes : calque, type et handle
    pub fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert("layer".into(), Value::String(self.layer.clone()));
        properties.insert("entityType".into(), Value::String(self.kind.clone()));
        if let Some(handle) = &self.handle {
            properties.insert("handle".into(), Value::String(handle.clone()));
        }
        properties
    }

    fn issue(&self, kind: IssueKind, message: String) -> ProcessingIssue {
        ProcessingIssue::new(
            kind,
            message,
            json!({ "entityType": self.kind, "layer": self.layer, "handle": self.handle }),
        )
    }

    /// Géométrie d'une entité simple (les INSERT sont résolus par l'appelant)
    pub fn geometry(&self) -> Result<(Geometry, ValidationFlags), ProcessingIssue> {
        let mut flags = ValidationFlags::default();
        let geometry = match &self.shape {
            Shape::Point(at) | Shape::Text { at, .. } => Geometry::Point(Point(*at)),
            Shape::Line(start, end) => Geometry::LineString(LineString::new(vec![*start, *end])),
            Shape::Polyline { vertices, closed } => self.polyline(vertices, *closed, &mut flags)?,
            Shape::Circle { center, radius } => {
                self.check_radius(*radius)?;
                Geometry::Polygon(Polygon::new(LineString::new(circle_ring(*center, *radius)), vec![]))
            }
            Shape::Arc {
                center,
                radius,
                start,
                end,
            } => {
                self.check_radius(*radius)?;
                Geometry::LineString(LineString::new(arc_points(*center, *radius, *start, *end)))
            }
            Shape::Ellipse {
                center,
                major,
                ratio,
                start,
                end,
            } => {
                let points = ellipse_points(*center, *major, *ratio, *start, *end);
                if is_full_turn(*start, *end) {
                    Geometry::Polygon(Polygon::new(LineString::new(points), vec![]))
                } else {
                    Geometry::LineString(LineString::new(points))
                }
            }
            Shape::Spline { control, fit } => {
                let points = if control.is_empty() { fit } else { control };
                if points.len() < 2 {
                    return Err(self.issue(
                        IssueKind::InvalidGeometry,
                        format!("SPLINE with {} point(s)", points.len()),
                    ));
                }
                Geometry::LineString(LineString::new(points.clone()))
            }
            Shape::Insert { .. } | Shape::Unsupported => {
                return Err(self.issue(
                    IssueKind::UnsupportedEntity,
                    format!("Unsupported entity type: {}", self.kind),
                ))
            }
        };

        if !all_finite(&geometry) {
            return Err(self.issue(
                IssueKind::InvalidCoordinates,
                format!("non-finite coordinates in {} entity", self.kind),
            ));
        }
        Ok((geometry, flags))
    }

    fn check_radius(&self, radius: f64) -> Result<(), ProcessingIssue> {
        if radius.is_finite() && radius > 0.0 {
            Ok(())
        } else {
            Err(self.issue(
                IssueKind::InvalidCoordinates,
                format!("invalid radius {} in {} entity", radius, self.kind),
            ))
        }
    }

    fn polyline(&self, vertices: &[Coord], closed: bool, flags: &mut ValidationFlags) -> Result<Geometry, ProcessingIssue> {
        if vertices.len() < 2 {
            return Err(self.issue(
                IssueKind::InvalidGeometry,
                format!("{} with {} vertex", self.kind, vertices.len()),
            ));
        }
        let mut ring = vertices.to_vec();
        let first = ring[0];
        let explicitly_closed = ring.len() > 2 && ring[ring.len() - 1] == first;
        if closed && !explicitly_closed {
            ring.push(first);
        }
        if (closed || explicitly_closed) && ring.len() >= 4 {
            return Ok(Geometry::Polygon(Polygon::new(LineString::new(ring), vec![])));
        }
        if closed {
            // Deux sommets marqués fermés : segment aller-retour
            flags.degenerate = true;
        }
        Ok(Geometry::LineString(LineString::new(vertices.to_vec())))
    }
}

/// Indique si toutes les coordonnées sont finies
pub fn all_finite(geometry: &Geometry) -> bool {
    let mut finite = true;
    crate::crs::map_coords(geometry, &mut |c: Coord| {
        finite &= c.x.is_finite() && c.y.is_finite();
        c
    });
    finite
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::dxf::tokenizer::{records, tokenize};

    fn entity(text: &str) -> Entity {
        let source = format!("0\nSECTION\n{}", text);
        let pairs = tokenize(&source, "t.dxf").unwrap();
        let record = records(&pairs).nth(1).unwrap();
        Entity::from_record(record)
    }

    #[test]
    fn test_closed_lwpolyline_first_equals_last() {
        let e = entity("0\nLWPOLYLINE\n8\nparcels\n70\n0\n10\n0\n20\n0\n10\n1\n20\n0\n10\n1\n20\n1\n10\n0\n20\n0\n");
        let (geometry, _) = e.geometry().unwrap();
        let Geometry::Polygon(polygon) = geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(polygon.exterior().0.len(), 4);
        assert_eq!(e.properties()["layer"], "parcels");
    }

    #[test]
    fn test_closed_flag_adds_closing_vertex() {
        let e = entity("0\nLWPOLYLINE\n70\n1\n10\n0\n20\n0\n10\n2\n20\n0\n10\n2\n20\n2\n");
        let (geometry, _) = e.geometry().unwrap();
        let Geometry::Polygon(polygon) = geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(polygon.exterior().0.len(), 4);
        assert_eq!(e.layer, DEFAULT_LAYER);
    }

    #[test]
    fn test_open_polyline_and_line() {
        let e = entity("0\nLWPOLYLINE\n70\n0\n10\n0\n20\n0\n10\n5\n20\n5\n");
        assert!(matches!(e.geometry(), Ok((Geometry::LineString(_), _))));
        let e = entity("0\nLINE\n10\n1\n20\n2\n11\n3\n21\n4\n");
        let Ok((Geometry::LineString(line), _)) = e.geometry() else {
            panic!("expected a line");
        };
        assert_eq!(line.0[1], Coord { x: 3.0, y: 4.0 });
    }

    #[test]
    fn test_circle_and_arc() {
        let circle = entity("0\nCIRCLE\n10\n0\n20\n0\n40\n5\n");
        assert!(matches!(circle.geometry(), Ok((Geometry::Polygon(_), _))));
        let arc = entity("0\nARC\n10\n0\n20\n0\n40\n5\n50\n0\n51\n180\n");
        let Ok((Geometry::LineString(line), _)) = arc.geometry() else {
            panic!("expected a line");
        };
        assert_eq!(line.0.len(), 19);
        let bad = entity("0\nCIRCLE\n10\n0\n20\n0\n40\n0\n");
        assert_eq!(bad.geometry().unwrap_err().kind, IssueKind::InvalidCoordinates);
    }

    #[test]
    fn test_mtext_concatenation() {
        let e = entity("0\nMTEXT\n10\n1\n20\n1\n3\nHello \n1\nworld\n");
        assert!(matches!(e.shape, Shape::Text { ref text, .. } if text == "Hello world"));
    }

    #[test]
    fn test_spline_falls_back_to_fit_points() {
        let e = entity("0\nSPLINE\n11\n0\n21\n0\n11\n1\n21\n1\n11\n2\n21\n0\n");
        let Ok((Geometry::LineString(line), _)) = e.geometry() else {
            panic!("expected a line");
        };
        assert_eq!(line.0.len(), 3);
    }

    #[test]
    fn test_non_finite_and_unsupported() {
        let e = entity("0\nPOINT\n10\nnan\n20\n1\n");
        assert_eq!(e.geometry().unwrap_err().kind, IssueKind::InvalidCoordinates);
        let e = entity("0\nHATCH\n8\nfill\n");
        assert_eq!(e.geometry().unwrap_err().kind, IssueKind::UnsupportedEntity);
    }
}
