//! Parser DXF (AutoCAD Drawing Exchange Format, ASCII)
//!
//! Le fichier est découpé en paires code/valeur, puis les sections TABLES,
//! BLOCKS et ENTITIES sont lues. Les INSERT sont remplacés par les entités
//! du bloc référencé, placées selon le point d'insertion, l'échelle et la
//! rotation.

pub mod entities;
pub mod tables;
pub mod tessellate;
pub mod tokenizer;

use std::collections::BTreeMap;

use geo::Coord;
use serde_json::{json, Value};
use tracing::debug;

use self::entities::{all_finite, Entity, Shape, DEFAULT_LAYER};
use self::tables::Drawing;
use self::tokenizer::tokenize;
use super::{finish_dataset, summary_from_sample, FormatParser, ParseOptions, ANALYZE_SAMPLE_SIZE};
use crate::companion::CompanionFileSet;
use crate::crs::map_coords;
use crate::error::Result;
use crate::registry::FormatKind;
use crate::stats::{IssueKind, ProcessorStats};
use crate::streaming::{collect_sample, decode_text, Chunk, ChunkProducer, ProgressSink, StreamProcessor};
use crate::types::{CanonicalFeature, Dataset, StructuralSummary};

/// Profondeur maximale de blocs imbriqués
pub const MAX_INSERT_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct DxfParser;

/// Placement d'une insertion : p' = at + R(rotation) * S * (p - base)
#[derive(Debug, Clone, Copy)]
struct Placement {
    base: Coord,
    at: Coord,
    scale_x: f64,
    scale_y: f64,
    cos: f64,
    sin: f64,
}

impl Placement {
    fn new(base: Coord, at: Coord, scale_x: f64, scale_y: f64, rotation_degrees: f64) -> Self {
        let (sin, cos) = rotation_degrees.to_radians().sin_cos();
        Self {
            base,
            at,
            scale_x,
            scale_y,
            cos,
            sin,
        }
    }

    fn is_finite(&self) -> bool {
        [self.at.x, self.at.y, self.scale_x, self.scale_y, self.cos, self.sin]
            .iter()
            .all(|v| v.is_finite())
    }

    fn apply(&self, c: Coord) -> Coord {
        let x = (c.x - self.base.x) * self.scale_x;
        let y = (c.y - self.base.y) * self.scale_y;
        Coord {
            x: self.at.x + x * self.cos - y * self.sin,
            y: self.at.y + x * self.sin + y * self.cos,
        }
    }
}

/// Convertit une entité en features, en développant les INSERT
fn convert(
    drawing: &Drawing,
    entity: &Entity,
    placements: &[Placement],
    inherited: Option<(&str, &str, &[(String, String)])>,
    depth: usize,
    features: &mut Vec<CanonicalFeature>,
    stats: &mut ProcessorStats,
) {
    if let Shape::Insert {
        block,
        at,
        scale_x,
        scale_y,
        rotation,
        attributes,
    } = &entity.shape
    {
        let details = json!({ "block": block, "layer": entity.layer, "handle": entity.handle });
        let Some(definition) = drawing.block(block) else {
            stats.issue(IssueKind::MissingBlock, format!("Block not found: {}", block), details);
            return;
        };
        if depth >= MAX_INSERT_DEPTH {
            stats.issue(
                IssueKind::InvalidGeometry,
                format!("Block nesting deeper than {} levels: {}", MAX_INSERT_DEPTH, block),
                details,
            );
            return;
        }

        let placement = Placement::new(definition.base, *at, *scale_x, *scale_y, *rotation);
        if !placement.is_finite() {
            stats.issue(
                IssueKind::InvalidCoordinates,
                format!("non-finite insertion point, scale or rotation for block {}", block),
                details,
            );
            return;
        }

        let mut nested = Vec::with_capacity(placements.len() + 1);
        nested.push(placement);
        nested.extend_from_slice(placements);

        // Les entités du calque 0 prennent le calque de l'insertion
        let layer = match inherited {
            Some((layer, _, _)) if entity.layer == DEFAULT_LAYER => layer,
            _ => entity.layer.as_str(),
        };
        for member in &definition.entities {
            convert(
                drawing,
                member,
                &nested,
                Some((layer, definition.name.as_str(), attributes.as_slice())),
                depth + 1,
                features,
                stats,
            );
        }
        return;
    }

    if matches!(entity.shape, Shape::Unsupported) {
        stats.issue(
            IssueKind::UnsupportedEntity,
            format!("Unsupported entity type: {}", entity.kind),
            json!({ "entityType": entity.kind, "layer": entity.layer }),
        );
        return;
    }

    let (geometry, flags) = match entity.geometry() {
        Ok(converted) => converted,
        Err(issue) => {
            stats.record_issue(issue);
            return;
        }
    };
    let geometry = if placements.is_empty() {
        geometry
    } else {
        let placed = map_coords(&geometry, &mut |c| placements.iter().fold(c, |c, p| p.apply(c)));
        if !all_finite(&placed) {
            stats.issue(
                IssueKind::InvalidCoordinates,
                format!("non-finite coordinates after block placement of {} entity", entity.kind),
                json!({
                    "block": inherited.map(|(_, block, _)| block),
                    "entityType": entity.kind,
                    "handle": entity.handle,
                }),
            );
            return;
        }
        placed
    };

    let mut properties = entity.properties();
    if let Some((layer, block, attributes)) = inherited {
        if entity.layer == DEFAULT_LAYER {
            properties.insert("layer".into(), Value::String(layer.to_string()));
        }
        properties.insert("block".into(), Value::String(block.to_string()));
        for (tag, value) in attributes {
            properties.entry(tag.as_str()).or_insert_with(|| Value::String(value.clone()));
        }
    }
    if let Shape::Text { text, .. } = &entity.shape {
        properties.insert("text".into(), Value::String(text.clone()));
    }

    let mut feature = CanonicalFeature::new(features.len() as u64, geometry, properties);
    feature.flags = flags;
    features.push(feature);
}

/// Producteur de chunks sur le flux d'entités
struct DxfProducer {
    drawing: Drawing,
    source_len: usize,
    next: usize,
    batch_bytes: usize,
}

impl DxfProducer {
    fn new(drawing: Drawing, source_len: usize, batch_bytes: usize) -> Self {
        Self {
            drawing,
            source_len,
            next: 0,
            batch_bytes: batch_bytes.max(1),
        }
    }

    fn batch_end(&self) -> usize {
        let mut bytes = 0;
        let mut end = self.next;
        while end < self.drawing.entities.len() && bytes < self.batch_bytes {
            bytes += self.drawing.entities[end].size;
            end += 1;
        }
        end
    }
}

impl ChunkProducer for DxfProducer {
    fn total_bytes(&self) -> usize {
        self.source_len
    }

    fn next_chunk_size(&self) -> usize {
        self.drawing.entities[self.next..self.batch_end()]
            .iter()
            .map(|e| e.size * 2)
            .sum()
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let total = self.drawing.entities.len();
        if self.next >= total {
            return Ok(None);
        }
        let end = self.batch_end();
        let mut features = Vec::new();
        let mut stats = ProcessorStats::new();
        for entity in &self.drawing.entities[self.next..end] {
            convert(&self.drawing, entity, &[], None, 0, &mut features, &mut stats);
        }
        self.next = end;
        Ok(Some(Chunk {
            features,
            stats,
            progress: end as f64 / total as f64,
        }))
    }
}

fn open(files: &CompanionFileSet) -> Result<Drawing> {
    let text = decode_text(&files.main.data);
    let pairs = tokenize(&text, &files.main.name)?;
    Ok(Drawing::read(&pairs))
}

impl FormatParser for DxfParser {
    fn format(&self) -> FormatKind {
        FormatKind::Dxf
    }

    fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary> {
        let drawing = open(files)?;

        let mut entity_types = BTreeMap::new();
        for entity in &drawing.entities {
            *entity_types.entry(entity.kind.clone()).or_insert(0usize) += 1;
        }
        let layers = drawing.layer_names();
        let blocks: Vec<String> = drawing.blocks.values().map(|b| b.name.clone()).collect();
        let estimated = drawing.entities.len();

        let mut producer = DxfProducer::new(drawing, files.main.len(), 1);
        let sample = collect_sample(&mut producer, ANALYZE_SAMPLE_SIZE)?;

        let mut summary = summary_from_sample(FormatKind::Dxf, sample, None, None);
        summary.layers = layers;
        summary.entity_types = entity_types;
        summary.blocks = blocks;
        summary.estimated_features = Some(estimated);
        Ok(summary)
    }

    fn parse(&self, files: &CompanionFileSet, options: &ParseOptions, sink: &ProgressSink) -> Result<Dataset> {
        let drawing = open(files)?;
        debug!(file = %files.main.name, entities = drawing.entities.len(), "DXF drawing loaded");
        let mut producer = DxfProducer::new(drawing, files.main.len(), options.chunk_size);
        let out = StreamProcessor::new(&files.main.name, options, sink).run(&mut producer)?;
        finish_dataset(&files.main.name, out, None, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::{resolve_one, FileRef};
    use crate::types::GeometryKind;
    use geo::Geometry;

    fn dxf(entities: &str) -> CompanionFileSet {
        let text = format!(
            "0\r\nSECTION\r\n2\r\nBLOCKS\r\n\
0\r\nBLOCK\r\n2\r\nMARK\r\n10\r\n0\r\n20\r\n0\r\n\
0\r\nPOINT\r\n8\r\n0\r\n10\r\n1\r\n20\r\n0\r\n\
0\r\nLINE\r\n8\r\nfixed\r\n10\r\n0\r\n20\r\n0\r\n11\r\n0\r\n21\r\n1\r\n\
0\r\nENDBLK\r\n0\r\nENDSEC\r\n\
0\r\nSECTION\r\n2\r\nENTITIES\r\n{}0\r\nENDSEC\r\n0\r\nEOF\r\n",
            entities
        );
        resolve_one(&[FileRef::new("plan.dxf", text.into_bytes())]).unwrap()
    }

    #[test]
    fn test_parse_closed_polyline() {
        let files = dxf("0\nLWPOLYLINE\n8\nparcels\n90\n4\n70\n0\n10\n0\n20\n0\n10\n10\n20\n0\n10\n10\n20\n10\n10\n0\n20\n0\n");
        let dataset = DxfParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();
        assert_eq!(dataset.len(), 1);
        let Geometry::Polygon(polygon) = &dataset.features[0].geometry else {
            panic!("expected a polygon");
        };
        assert_eq!(polygon.exterior().0.len(), 4);
        assert_eq!(dataset.features[0].properties["layer"], "parcels");
        assert_eq!(dataset.features[0].properties["entityType"], "LWPOLYLINE");
    }

    #[test]
    fn test_insert_is_expanded_with_placement() {
        let files = dxf("0\nINSERT\n8\nsurvey\n2\nMARK\n10\n100\n20\n50\n41\n2\n42\n2\n50\n90\n");
        let dataset = DxfParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();
        assert_eq!(dataset.len(), 2);

        let Geometry::Point(point) = &dataset.features[0].geometry else {
            panic!("expected a point");
        };
        // (1, 0) mis à l'échelle x2 puis tourné de 90° : (0, 2)
        assert!((point.x() - 100.0).abs() < 1e-9);
        assert!((point.y() - 52.0).abs() < 1e-9);
        assert_eq!(dataset.features[0].properties["layer"], "survey");
        assert_eq!(dataset.features[0].properties["block"], "MARK");
        assert_eq!(dataset.features[1].properties["layer"], "fixed");
    }

    #[test]
    fn test_insert_with_unreadable_placement_is_skipped() {
        let files = dxf("0\nINSERT\n2\nMARK\n10\nabc\n20\n50\n0\nINSERT\n2\nMARK\n10\n1e308\n20\n1e308\n41\n1e308\n42\n1e308\n0\nPOINT\n10\n3\n20\n4\n");
        let dataset = DxfParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();

        // Seul le POINT hors bloc subsiste, aucune coordonnée non finie
        assert_eq!(dataset.len(), 1);
        assert!(dataset.features.iter().all(|f| all_finite(&f.geometry)));
        // Insertion illisible, puis POINT et LINE du bloc qui débordent après placement
        assert_eq!(dataset.stats.count_of(IssueKind::InvalidCoordinates), 3);
        assert_eq!(dataset.metadata.bounds.to_array(), [3.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_missing_block_and_unsupported_entities() {
        let files = dxf("0\nINSERT\n2\nGHOST\n10\n0\n20\n0\n0\nHATCH\n8\nfill\n0\nPOINT\n10\n7.4\n20\n46.9\n");
        let dataset = DxfParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.stats.count_of(IssueKind::MissingBlock), 1);
        assert_eq!(dataset.stats.count_of(IssueKind::UnsupportedEntity), 1);
        assert_eq!(dataset.metadata.source_srid, Some(4326));
    }

    #[test]
    fn test_text_and_circle() {
        let files = dxf("0\nTEXT\n8\nlabels\n10\n5\n20\n5\n1\nBern\n0\nCIRCLE\n10\n0\n20\n0\n40\n1\n");
        let dataset = DxfParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();
        assert_eq!(dataset.features[0].properties["text"], "Bern");
        assert_eq!(dataset.features[1].kind(), GeometryKind::Polygon);
    }

    #[test]
    fn test_analyze() {
        let files = dxf("0\nPOINT\n8\na\n10\n1\n20\n1\n0\nPOINT\n8\nb\n10\n2\n20\n2\n0\nSOLID\n8\nb\n");
        let summary = DxfParser.analyze(&files).unwrap();
        assert_eq!(summary.layers, vec!["a", "b"]);
        assert_eq!(summary.entity_types.get("POINT"), Some(&2));
        assert_eq!(summary.entity_types.get("SOLID"), Some(&1));
        assert_eq!(summary.blocks, vec!["MARK"]);
        assert_eq!(summary.sample.len(), 2);
    }
}
