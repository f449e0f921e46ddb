//! Lecture des enregistrements .shp et décodage des géométries

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde_json::json;
use tracing::debug;

use super::header::{be_i32, le_f64, le_i32, parse_header, ShapeFamily, ShapeType, HEADER_LENGTH};
use crate::error::Result;
use crate::stats::{IssueKind, ProcessingIssue, ProcessorStats};
use crate::types::ValidationFlags;

/// Longueur maximale d'un contenu d'enregistrement (en mots de 16 bits)
pub const MAX_CONTENT_WORDS: i32 = 1_000_000;

/// Nombre maximal de parties ou de points par enregistrement
pub const MAX_PARTS_OR_POINTS: i32 = 1_000_000;

/// Position d'un enregistrement dans le .shp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpan {
    /// Numéro d'enregistrement (à partir de 1)
    pub number: i32,
    /// Début du contenu (après l'en-tête de 8 octets)
    pub content_start: usize,
    pub content_len: usize,
}

fn malformed(number: i32, message: String) -> ProcessingIssue {
    ProcessingIssue::new(IssueKind::MalformedRecord, message, json!({ "record": number }))
}

/// Parcourt séquentiellement les enregistrements
pub fn scan_sequential(shp: &[u8], file_length: usize, stats: &mut ProcessorStats) -> Vec<RecordSpan> {
    let end = file_length.min(shp.len());
    let mut spans = Vec::new();
    let mut pos = HEADER_LENGTH;

    while pos + 8 <= end {
        let number = be_i32(shp, pos).unwrap_or_default();
        let words = be_i32(shp, pos + 4).unwrap_or(-1);
        if !(0..=MAX_CONTENT_WORDS).contains(&words) {
            stats.record_issue(malformed(
                number,
                format!("unreasonable record content length {} for record {}", words, number),
            ));
            break;
        }
        let content_len = words as usize * 2;
        let content_start = pos + 8;
        if content_start + content_len > end {
            stats.record_issue(malformed(
                number,
                format!(
                    "truncated record content for record {} (need {} bytes, have {})",
                    number,
                    content_len,
                    end - content_start
                ),
            ));
            break;
        }
        spans.push(RecordSpan {
            number,
            content_start,
            content_len,
        });
        pos = content_start + content_len;
    }
    spans
}

/// Positions lues dans l'index .shx, ou `None` si l'index ne concorde pas
pub fn spans_from_index(shp: &[u8], file_length: usize, shx: &[u8], shx_name: &str) -> Option<Vec<RecordSpan>> {
    let header = parse_header(shx, shx_name).ok()?;
    let entries = (header.file_length.saturating_sub(HEADER_LENGTH)) / 8;
    let end = file_length.min(shp.len());
    let mut spans = Vec::with_capacity(entries);

    for i in 0..entries {
        let at = HEADER_LENGTH + i * 8;
        let offset = usize::try_from(be_i32(shx, at)?).ok()? * 2;
        let words = be_i32(shx, at + 4)?;
        if !(0..=MAX_CONTENT_WORDS).contains(&words) {
            return None;
        }
        let content_len = words as usize * 2;
        if offset < HEADER_LENGTH || offset + 8 + content_len > end {
            return None;
        }
        // L'en-tête d'enregistrement du .shp doit confirmer la longueur
        if be_i32(shp, offset + 4)? != words {
            return None;
        }
        spans.push(RecordSpan {
            number: be_i32(shp, offset)?,
            content_start: offset + 8,
            content_len,
        });
    }
    Some(spans)
}

/// Résultat du décodage d'un enregistrement
#[derive(Debug)]
pub enum Decoded {
    /// Forme nulle : ignorée silencieusement
    Null,
    Shape {
        geometry: Geometry,
        shape_type: ShapeType,
        flags: ValidationFlags,
        /// Altitude d'un PointZ
        z: Option<f64>,
    },
    Skipped(ProcessingIssue),
}

/// Type d'un enregistrement sans le décoder
pub fn peek_shape_type(content: &[u8]) -> Option<i32> {
    le_i32(content, 0)
}

/// Décode le contenu d'un enregistrement
pub fn decode_record(content: &[u8], number: i32) -> Decoded {
    let Some(code) = le_i32(content, 0) else {
        return Decoded::Skipped(malformed(number, format!("empty record {}", number)));
    };
    let Some(shape_type) = ShapeType::from_code(code) else {
        return Decoded::Skipped(ProcessingIssue::new(
            IssueKind::UnsupportedEntity,
            format!("Invalid shape type: {}", code),
            json!({ "record": number, "shapeType": code }),
        ));
    };

    let result = match shape_type.family() {
        ShapeFamily::Null => return Decoded::Null,
        ShapeFamily::MultiPatch => Err(ProcessingIssue::new(
            IssueKind::UnsupportedEntity,
            "MultiPatch records are not supported",
            json!({ "record": number, "shapeType": code }),
        )),
        ShapeFamily::Point => decode_point(content, shape_type, number),
        ShapeFamily::MultiPoint => decode_multipoint(content, number),
        ShapeFamily::PolyLine => decode_parts(content, shape_type, number).and_then(|parts| polyline(parts, number)),
        ShapeFamily::Polygon => decode_parts(content, shape_type, number).and_then(|parts| polygon(parts, number)),
    };

    match result {
        Ok((geometry, mut flags, z)) => {
            flags.has_z |= shape_type.has_z();
            Decoded::Shape {
                geometry,
                shape_type,
                flags,
                z,
            }
        }
        Err(issue) => Decoded::Skipped(issue),
    }
}

type Converted = std::result::Result<(Geometry, ValidationFlags, Option<f64>), ProcessingIssue>;

fn invalid_coordinates(number: i32, x: f64, y: f64, part: usize, point: usize) -> ProcessingIssue {
    ProcessingIssue::new(
        IssueKind::InvalidCoordinates,
        format!("non-finite coordinates ({}, {}) at part {}, point {}", x, y, part, point),
        json!({ "record": number, "part": part, "point": point }),
    )
}

fn truncated(number: i32) -> ProcessingIssue {
    malformed(number, format!("truncated geometry in record {}", number))
}

fn read_coord(content: &[u8], at: usize, number: i32, part: usize, point: usize) -> std::result::Result<Coord, ProcessingIssue> {
    let x = le_f64(content, at).ok_or_else(|| truncated(number))?;
    let y = le_f64(content, at + 8).ok_or_else(|| truncated(number))?;
    if !x.is_finite() || !y.is_finite() {
        return Err(invalid_coordinates(number, x, y, part, point));
    }
    Ok(Coord { x, y })
}

fn decode_point(content: &[u8], shape_type: ShapeType, number: i32) -> Converted {
    let coord = read_coord(content, 4, number, 0, 0)?;
    let z = if shape_type.has_z() {
        le_f64(content, 20).filter(|z| z.is_finite())
    } else {
        None
    };
    Ok((Geometry::Point(Point(coord)), ValidationFlags::default(), z))
}

fn check_counts(parts: i32, points: i32, shape: &str, number: i32) -> std::result::Result<(), ProcessingIssue> {
    if parts <= 0 || parts > MAX_PARTS_OR_POINTS || points <= 0 || points > MAX_PARTS_OR_POINTS {
        return Err(malformed(
            number,
            format!(
                "Invalid {}: unreasonable number of parts ({}) or points ({})",
                shape, parts, points
            ),
        ));
    }
    Ok(())
}

fn decode_multipoint(content: &[u8], number: i32) -> Converted {
    let count = le_i32(content, 36).ok_or_else(|| truncated(number))?;
    check_counts(1, count, "MultiPoint", number)?;
    let count = count as usize;
    if content.len() < 40 + count * 16 {
        return Err(truncated(number));
    }
    let points = (0..count)
        .map(|i| read_coord(content, 40 + i * 16, number, 0, i).map(Point))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((
        Geometry::MultiPoint(MultiPoint::new(points)),
        ValidationFlags::default(),
        None,
    ))
}

/// Décode les parties d'une PolyLine / d'un Polygon
fn decode_parts(content: &[u8], shape_type: ShapeType, number: i32) -> std::result::Result<Vec<Vec<Coord>>, ProcessingIssue> {
    let num_parts = le_i32(content, 36).ok_or_else(|| truncated(number))?;
    let num_points = le_i32(content, 40).ok_or_else(|| truncated(number))?;
    check_counts(num_parts, num_points, shape_type.name(), number)?;

    let (num_parts, num_points) = (num_parts as usize, num_points as usize);
    let points_at = 44 + num_parts * 4;
    if content.len() < points_at + num_points * 16 {
        return Err(truncated(number));
    }

    let mut starts = Vec::with_capacity(num_parts);
    for i in 0..num_parts {
        let start = le_i32(content, 44 + i * 4).ok_or_else(|| truncated(number))?;
        if start < 0 || start as usize >= num_points {
            return Err(malformed(
                number,
                format!("part index {} out of bounds (num points: {})", start, num_points),
            ));
        }
        starts.push(start as usize);
    }

    let mut parts = Vec::with_capacity(num_parts);
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(num_points);
        if start >= end {
            return Err(malformed(
                number,
                format!("part {} has invalid range ({} >= {})", i, start, end),
            ));
        }
        let coords = (start..end)
            .map(|p| read_coord(content, points_at + p * 16, number, i, p - start))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        parts.push(coords);
    }
    Ok(parts)
}

fn polyline(parts: Vec<Vec<Coord>>, number: i32) -> Converted {
    let mut flags = ValidationFlags::default();
    let mut lines: Vec<LineString> = Vec::with_capacity(parts.len());
    for part in parts {
        if part.len() < 2 {
            flags.degenerate = true;
            continue;
        }
        lines.push(LineString::new(part));
    }

    let geometry = match lines.len() {
        0 => {
            return Err(ProcessingIssue::new(
                IssueKind::InvalidGeometry,
                format!("PolyLine record {} has no part with two points", number),
                json!({ "record": number }),
            ))
        }
        1 => Geometry::LineString(lines.remove(0)),
        _ => Geometry::MultiLineString(MultiLineString::new(lines)),
    };
    Ok((geometry, flags, None))
}

/// Orientation d'un anneau : somme (x2 - x1) * (y2 + y1) positive = horaire
pub fn is_clockwise(ring: &[Coord]) -> bool {
    ring.windows(2)
        .map(|w| (w[1].x - w[0].x) * (w[1].y + w[0].y))
        .sum::<f64>()
        > 0.0
}

fn polygon(parts: Vec<Vec<Coord>>, number: i32) -> Converted {
    let mut flags = ValidationFlags::default();
    let mut shells: Vec<(LineString, Vec<LineString>)> = Vec::new();

    for mut ring in parts {
        if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
            if first != last {
                ring.push(first);
                flags.unclosed_ring_closed = true;
            }
        }
        if ring.len() < 4 {
            flags.degenerate = true;
            continue;
        }

        if is_clockwise(&ring) {
            shells.push((LineString::new(ring), Vec::new()));
        } else if let Some((_, holes)) = shells.last_mut() {
            holes.push(LineString::new(ring));
        } else {
            // Trou sans coque englobante : promu en coque
            flags.ring_orientation_fixed = true;
            shells.push((LineString::new(ring), Vec::new()));
        }
    }

    let mut polygons: Vec<Polygon> = shells
        .into_iter()
        .map(|(exterior, holes)| Polygon::new(exterior, holes))
        .collect();

    let geometry = match polygons.len() {
        0 => {
            return Err(ProcessingIssue::new(
                IssueKind::InvalidGeometry,
                format!("Polygon record {} has no valid ring", number),
                json!({ "record": number }),
            ))
        }
        1 => Geometry::Polygon(polygons.remove(0)),
        _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
    };
    if flags.degenerate {
        debug!(record = number, "Skipped rings with fewer than four points");
    }
    Ok((geometry, flags, None))
}

/// Lit tous les enregistrements (index .shx si cohérent, sinon séquentiel)
pub fn record_spans(
    shp: &[u8],
    shp_name: &str,
    shx: Option<(&[u8], &str)>,
    stats: &mut ProcessorStats,
) -> Result<Vec<RecordSpan>> {
    let header = parse_header(shp, shp_name)?;
    if let Some((shx, shx_name)) = shx {
        match spans_from_index(shp, header.file_length, shx, shx_name) {
            Some(spans) => return Ok(spans),
            None => debug!(file = shp_name, "Index offsets disagree with records, scanning sequentially"),
        }
    }
    Ok(scan_sequential(shp, header.file_length, stats))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parsers::shapefile::header::tests::header_bytes;

    /// Contenu d'un PolyLine / Polygon
    pub(crate) fn parts_content(shape_code: i32, parts: &[&[(f64, f64)]]) -> Vec<u8> {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let mut buf = Vec::new();
        buf.extend_from_slice(&shape_code.to_le_bytes());
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&(parts.len() as i32).to_le_bytes());
        buf.extend_from_slice(&(total as i32).to_le_bytes());
        let mut start = 0i32;
        for part in parts {
            buf.extend_from_slice(&start.to_le_bytes());
            start += part.len() as i32;
        }
        for part in parts {
            for (x, y) in part.iter() {
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
            }
        }
        buf
    }

    pub(crate) fn point_content(x: f64, y: f64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&y.to_le_bytes());
        buf
    }

    /// Fichiers .shp et .shx complets à partir de contenus d'enregistrements
    pub(crate) fn shp_and_shx(shape_code: i32, contents: &[Vec<u8>]) -> (Vec<u8>, Vec<u8>) {
        let mut records = Vec::new();
        let mut index = Vec::new();
        for (i, content) in contents.iter().enumerate() {
            let offset = HEADER_LENGTH + records.len();
            index.extend_from_slice(&((offset / 2) as i32).to_be_bytes());
            index.extend_from_slice(&((content.len() / 2) as i32).to_be_bytes());
            records.extend_from_slice(&(i as i32 + 1).to_be_bytes());
            records.extend_from_slice(&((content.len() / 2) as i32).to_be_bytes());
            records.extend_from_slice(content);
        }
        let bbox = [0.0, 0.0, 10.0, 10.0];
        let mut shp = header_bytes(shape_code, HEADER_LENGTH + records.len(), bbox);
        shp.extend(records);
        let mut shx = header_bytes(shape_code, HEADER_LENGTH + index.len(), bbox);
        shx.extend(index);
        (shp, shx)
    }

    #[test]
    fn test_clockwise() {
        let cw = [
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 0.0, y: 1.0 },
            Coord { x: 1.0, y: 1.0 },
            Coord { x: 1.0, y: 0.0 },
            Coord { x: 0.0, y: 0.0 },
        ];
        assert!(is_clockwise(&cw));
        let mut ccw = cw;
        ccw.reverse();
        assert!(!is_clockwise(&ccw));
    }

    #[test]
    fn test_polygon_with_hole_and_second_shell() {
        let shell: &[(f64, f64)] = &[(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0), (0.0, 0.0)];
        let hole: &[(f64, f64)] = &[(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0), (2.0, 2.0)];
        let other: &[(f64, f64)] = &[(20.0, 20.0), (20.0, 21.0), (21.0, 21.0), (21.0, 20.0)];

        let content = parts_content(5, &[shell, hole, other]);
        let Decoded::Shape { geometry, flags, .. } = decode_record(&content, 1) else {
            panic!("expected a shape");
        };
        let Geometry::MultiPolygon(mp) = geometry else {
            panic!("expected a MultiPolygon");
        };
        assert_eq!(mp.0.len(), 2);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert!(flags.unclosed_ring_closed);
    }

    #[test]
    fn test_polyline_parts() {
        let a: &[(f64, f64)] = &[(0.0, 0.0), (1.0, 1.0)];
        let b: &[(f64, f64)] = &[(5.0, 5.0), (6.0, 6.0), (7.0, 5.0)];
        match decode_record(&parts_content(3, &[a]), 1) {
            Decoded::Shape { geometry: Geometry::LineString(ls), .. } => assert_eq!(ls.0.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match decode_record(&parts_content(3, &[a, b]), 2) {
            Decoded::Shape { geometry: Geometry::MultiLineString(mls), .. } => assert_eq!(mls.0.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_record_validation() {
        // Type inconnu
        assert!(matches!(
            decode_record(&99i32.to_le_bytes(), 1),
            Decoded::Skipped(ProcessingIssue { kind: IssueKind::UnsupportedEntity, .. })
        ));
        // Forme nulle
        assert!(matches!(decode_record(&0i32.to_le_bytes(), 1), Decoded::Null));
        // Coordonnée non finie
        assert!(matches!(
            decode_record(&point_content(f64::NAN, 1.0), 1),
            Decoded::Skipped(ProcessingIssue { kind: IssueKind::InvalidCoordinates, .. })
        ));
        // Index de partie hors limites
        let line: &[(f64, f64)] = &[(0.0, 0.0), (1.0, 1.0)];
        let mut content = parts_content(3, &[line]);
        content[44..48].copy_from_slice(&5i32.to_le_bytes());
        assert!(matches!(
            decode_record(&content, 1),
            Decoded::Skipped(ProcessingIssue { kind: IssueKind::MalformedRecord, .. })
        ));
    }

    #[test]
    fn test_index_and_sequential_agree() {
        let contents = vec![point_content(1.0, 2.0), point_content(3.0, 4.0)];
        let (shp, shx) = shp_and_shx(1, &contents);
        let mut stats = ProcessorStats::new();

        let indexed = record_spans(&shp, "a.shp", Some((&shx, "a.shx")), &mut stats).unwrap();
        let sequential = record_spans(&shp, "a.shp", None, &mut stats).unwrap();
        assert_eq!(indexed, sequential);
        assert_eq!(indexed.len(), 2);
    }

    #[test]
    fn test_bad_index_falls_back() {
        let contents = vec![point_content(1.0, 2.0), point_content(3.0, 4.0)];
        let (shp, mut shx) = shp_and_shx(1, &contents);
        shx[104..108].copy_from_slice(&7i32.to_be_bytes());
        let mut stats = ProcessorStats::new();

        let spans = record_spans(&shp, "a.shp", Some((&shx, "a.shx")), &mut stats).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(stats.issue_count(), 0);
    }
}
