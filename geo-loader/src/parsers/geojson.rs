//! Parser GeoJSON (FeatureCollection, Feature ou géométrie seule)

use std::sync::OnceLock;

use geo::{Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Polygon};
use geojson::{feature::Id, GeoJson, JsonObject};
use regex::Regex;
use serde_json::{json, Value};

use super::{finish_dataset, summary_from_sample, FormatParser, ParseOptions, ANALYZE_SAMPLE_SIZE};
use crate::companion::CompanionFileSet;
use crate::crs::SRID_WGS84;
use crate::error::{LoaderError, Result};
use crate::registry::FormatKind;
use crate::stats::{IssueKind, ProcessorStats};
use crate::streaming::{collect_sample, decode_text, Chunk, ChunkProducer, ProgressSink, StreamProcessor};
use crate::types::{CanonicalFeature, Dataset, Properties, StructuralSummary};

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonParser;

fn epsg_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)EPSG:+(?:[\d.]*:)?(\d+)\s*$").ok()).as_ref()
}

/// SRID d'un membre `crs` (syntaxe GeoJSON 2008)
///
/// Accepte `EPSG:2056`, `urn:ogc:def:crs:EPSG::2056` et `CRS84`.
pub fn srid_from_crs_member(members: Option<&JsonObject>) -> Option<u32> {
    let name = members?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?
        .trim();
    if name.to_ascii_uppercase().ends_with("CRS84") {
        return Some(SRID_WGS84);
    }
    epsg_regex()?.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Feature source avant conversion
struct Pending {
    geometry: Option<geojson::Geometry>,
    properties: Option<JsonObject>,
    id: Option<Id>,
}

impl From<geojson::Feature> for Pending {
    fn from(feature: geojson::Feature) -> Self {
        Self {
            geometry: feature.geometry,
            properties: feature.properties,
            id: feature.id,
        }
    }
}

/// Document décodé
struct Document {
    features: Vec<Pending>,
    declared_srid: Option<u32>,
}

fn read_document(files: &CompanionFileSet) -> Result<Document> {
    let text = decode_text(&files.main.data);
    let geojson: GeoJson = text.parse()?;

    let document = match geojson {
        GeoJson::FeatureCollection(collection) => Document {
            declared_srid: srid_from_crs_member(collection.foreign_members.as_ref()),
            features: collection.features.into_iter().map(Pending::from).collect(),
        },
        GeoJson::Feature(feature) => Document {
            declared_srid: srid_from_crs_member(feature.foreign_members.as_ref()),
            features: vec![Pending::from(feature)],
        },
        GeoJson::Geometry(geometry) => Document {
            declared_srid: srid_from_crs_member(geometry.foreign_members.as_ref()),
            features: vec![Pending {
                geometry: Some(geometry),
                properties: None,
                id: None,
            }],
        },
    };
    if document.features.is_empty() {
        return Err(LoaderError::EmptyDataset(files.main.name.clone()));
    }
    Ok(document)
}

fn without_empty_rings(polygon: Polygon, dropped: &mut usize) -> Polygon {
    let (exterior, interiors) = polygon.into_inner();
    let before = interiors.len();
    let interiors: Vec<LineString> = interiors.into_iter().filter(|ring| !ring.0.is_empty()).collect();
    *dropped += before - interiors.len();
    Polygon::new(exterior, interiors)
}

/// Retire les membres sans coordonnées (lignes, anneaux, polygones, géométries)
fn prune_empty_members(geometry: Geometry, dropped: &mut usize) -> Geometry {
    match geometry {
        Geometry::Polygon(p) => Geometry::Polygon(without_empty_rings(p, dropped)),
        Geometry::MultiLineString(mls) => {
            let before = mls.0.len();
            let kept: Vec<LineString> = mls.0.into_iter().filter(|ls| !ls.0.is_empty()).collect();
            *dropped += before - kept.len();
            Geometry::MultiLineString(MultiLineString::new(kept))
        }
        Geometry::MultiPolygon(mp) => {
            let before = mp.0.len();
            let kept: Vec<Polygon> = mp
                .0
                .into_iter()
                .filter(|p| !p.exterior().0.is_empty())
                .collect();
            *dropped += before - kept.len();
            Geometry::MultiPolygon(MultiPolygon::new(
                kept.into_iter().map(|p| without_empty_rings(p, dropped)).collect(),
            ))
        }
        Geometry::GeometryCollection(gc) => {
            let before = gc.0.len();
            let kept: Vec<Geometry> = gc
                .0
                .into_iter()
                .map(|member| prune_empty_members(member, dropped))
                .filter(has_coordinates)
                .collect();
            *dropped += before - kept.len();
            Geometry::GeometryCollection(GeometryCollection(kept))
        }
        other => other,
    }
}

fn has_coordinates(geometry: &Geometry) -> bool {
    match geometry {
        Geometry::LineString(ls) => !ls.0.is_empty(),
        Geometry::Polygon(p) => !p.exterior().0.is_empty(),
        Geometry::MultiPoint(mp) => !mp.0.is_empty(),
        Geometry::MultiLineString(mls) => mls.iter().any(|ls| !ls.0.is_empty()),
        Geometry::MultiPolygon(mp) => mp.iter().any(|p| !p.exterior().0.is_empty()),
        Geometry::GeometryCollection(gc) => gc.iter().any(has_coordinates),
        _ => true,
    }
}

fn convert(index: usize, pending: Pending, stats: &mut ProcessorStats) -> Option<CanonicalFeature> {
    let id_value = pending.id.map(|id| match id {
        Id::String(s) => Value::String(s),
        Id::Number(n) => Value::Number(n),
    });
    let details = json!({ "feature": index, "id": id_value });

    let Some(source) = pending.geometry else {
        stats.issue(IssueKind::InvalidGeometry, format!("Feature {} has no geometry", index), details);
        return None;
    };
    let mut dropped = 0;
    let geometry = match Geometry::<f64>::try_from(source).map(|g| prune_empty_members(g, &mut dropped)) {
        Ok(geometry) if has_coordinates(&geometry) => geometry,
        Ok(_) => {
            stats.issue(IssueKind::InvalidGeometry, format!("Feature {} has empty coordinates", index), details);
            return None;
        }
        Err(e) => {
            stats.issue(IssueKind::InvalidGeometry, format!("Feature {}: {}", index, e), details);
            return None;
        }
    };

    if dropped > 0 {
        stats.issue(
            IssueKind::InvalidGeometry,
            format!("Feature {}: {} empty member(s) dropped", index, dropped),
            json!({ "feature": index, "id": id_value, "emptyMembers": dropped }),
        );
    }

    let mut properties: Properties = pending.properties.unwrap_or_default();
    if let Some(id) = id_value {
        properties.entry("id").or_insert(id);
    }
    Some(CanonicalFeature::new(index as u64, geometry, properties))
}

struct GeoJsonProducer {
    features: std::vec::IntoIter<Pending>,
    total: usize,
    done: usize,
    source_len: usize,
    batch: usize,
}

impl GeoJsonProducer {
    fn new(document: Document, source_len: usize, chunk_size: usize) -> Self {
        let total = document.features.len();
        let average = (source_len / total.max(1)).max(1);
        Self {
            features: document.features.into_iter(),
            total,
            done: 0,
            source_len,
            batch: (chunk_size / average).max(1),
        }
    }
}

impl ChunkProducer for GeoJsonProducer {
    fn total_bytes(&self) -> usize {
        self.source_len
    }

    fn next_chunk_size(&self) -> usize {
        let remaining = self.total - self.done;
        self.batch.min(remaining) * (self.source_len / self.total.max(1)).max(1)
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done >= self.total {
            return Ok(None);
        }
        let mut features = Vec::new();
        let mut stats = ProcessorStats::new();
        for pending in self.features.by_ref().take(self.batch) {
            if let Some(feature) = convert(self.done, pending, &mut stats) {
                features.push(feature);
            }
            self.done += 1;
        }
        Ok(Some(Chunk {
            features,
            stats,
            progress: self.done as f64 / self.total as f64,
        }))
    }
}

impl FormatParser for GeoJsonParser {
    fn format(&self) -> FormatKind {
        FormatKind::GeoJson
    }

    fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary> {
        let document = read_document(files)?;
        let declared_srid = document.declared_srid;
        let estimated = document.features.len();

        let mut producer = GeoJsonProducer::new(document, files.main.len(), 0);
        let sample = collect_sample(&mut producer, ANALYZE_SAMPLE_SIZE)?;
        let mut summary = summary_from_sample(FormatKind::GeoJson, sample, declared_srid, None);
        for feature in &summary.sample {
            *summary.entity_types.entry(feature.kind().to_string()).or_insert(0) += 1;
        }
        summary.layers = vec![files.main.base_name()];
        summary.estimated_features = Some(estimated);
        Ok(summary)
    }

    fn parse(&self, files: &CompanionFileSet, options: &ParseOptions, sink: &ProgressSink) -> Result<Dataset> {
        let document = read_document(files)?;
        let declared_srid = document.declared_srid;
        let mut producer = GeoJsonProducer::new(document, files.main.len(), options.chunk_size);
        let out = StreamProcessor::new(&files.main.name, options, sink).run(&mut producer)?;
        finish_dataset(&files.main.name, out, declared_srid, options)
    }
}
