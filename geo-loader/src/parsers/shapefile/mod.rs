//! Parser ESRI Shapefile (.shp + .shx + .dbf, .prj et .cpg optionnels)
//!
//! Le `.shp` est lu d'un bloc ; les enregistrements sont localisés par le
//! `.shx` puis convertis par paquets. Chaque géométrie est associée à la
//! ligne du `.dbf` de même rang.

pub mod dbf;
pub mod header;
pub mod prj;
pub mod shp;

use std::collections::BTreeMap;

use bytes::Bytes;
use encoding_rs::Encoding;
use tracing::{debug, warn};

use self::dbf::{encoding_from_cpg, DbfTable};
use self::header::{parse_header, ShapeType};
use self::shp::{decode_record, peek_shape_type, record_spans, Decoded, RecordSpan};
use super::{finish_dataset, summary_from_sample, FormatParser, ParseOptions, ANALYZE_SAMPLE_SIZE};
use crate::companion::CompanionFileSet;
use crate::error::Result;
use crate::registry::FormatKind;
use crate::stats::ProcessorStats;
use crate::streaming::{collect_sample, read_binary, Chunk, ChunkProducer, ProgressSink, StreamProcessor};
use crate::types::{CanonicalFeature, Dataset, Properties, StructuralSummary};

/// Taille d'un paquet quand aucune taille de chunk n'est fournie
const DEFAULT_BATCH_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShapefileParser;

/// Fichiers d'un shapefile, décodés mais pas encore convertis
struct Sources {
    shp_name: String,
    shp: Bytes,
    dbf_name: Option<String>,
    dbf: Option<Bytes>,
    encoding: &'static Encoding,
    declared_srid: Option<u32>,
    spans: Vec<RecordSpan>,
    /// Erreurs de lecture séquentielle (avant tout chunk)
    scan_stats: ProcessorStats,
}

impl Sources {
    fn open(files: &CompanionFileSet) -> Result<Self> {
        let shp = read_binary(&files.main)?;
        let shx = files.companion("shx").map(read_binary).transpose()?;
        let mut scan_stats = ProcessorStats::new();
        let spans = record_spans(
            &shp,
            &files.main.name,
            shx.as_ref().zip(files.companion("shx")).map(|(data, file)| (&data[..], file.name.as_str())),
            &mut scan_stats,
        )?;

        let encoding = files
            .companion("cpg")
            .and_then(|cpg| encoding_from_cpg(&cpg.data))
            .unwrap_or(encoding_rs::WINDOWS_1252);

        let declared_srid = files
            .companion("prj")
            .and_then(|prj| prj::srid_from_wkt(&crate::streaming::decode_text(&prj.data)));

        let dbf_file = files.companion("dbf");
        let dbf = dbf_file.map(read_binary).transpose()?;
        if let (Some(data), Some(file)) = (&dbf, dbf_file) {
            // Validation de l'en-tête avant toute conversion
            let table = DbfTable::parse(data, &file.name, encoding)?;
            if table.available_records() != spans.len() {
                warn!(
                    file = %file.name,
                    records = spans.len(),
                    rows = table.available_records(),
                    "Attribute row count differs from geometry count"
                );
            }
        }

        debug!(
            file = %files.main.name,
            records = spans.len(),
            encoding = encoding.name(),
            srid = ?declared_srid,
            "Shapefile opened"
        );

        Ok(Self {
            shp_name: files.main.name.clone(),
            shp,
            dbf_name: dbf_file.map(|f| f.name.clone()),
            dbf,
            encoding,
            declared_srid,
            spans,
            scan_stats,
        })
    }

    fn table(&self) -> Option<DbfTable<'_>> {
        let data = self.dbf.as_ref()?;
        DbfTable::parse(data, self.dbf_name.as_deref().unwrap_or_default(), self.encoding).ok()
    }
}

/// Producteur de chunks : un paquet d'enregistrements par appel
struct ShapefileProducer {
    sources: Sources,
    next: usize,
    batch_bytes: usize,
    null_records: usize,
    missing_rows: usize,
}

impl ShapefileProducer {
    fn new(sources: Sources, batch_bytes: usize) -> Self {
        Self {
            sources,
            next: 0,
            batch_bytes: if batch_bytes == 0 { DEFAULT_BATCH_BYTES } else { batch_bytes },
            null_records: 0,
            missing_rows: 0,
        }
    }

    /// Fin (exclue) du prochain paquet
    fn batch_end(&self) -> usize {
        let mut bytes = 0;
        let mut end = self.next;
        while end < self.sources.spans.len() {
            bytes += self.sources.spans[end].content_len;
            end += 1;
            if bytes >= self.batch_bytes {
                break;
            }
        }
        end
    }
}

impl ChunkProducer for ShapefileProducer {
    fn total_bytes(&self) -> usize {
        self.sources.shp.len() + self.sources.dbf.as_ref().map_or(0, Bytes::len)
    }

    fn next_chunk_size(&self) -> usize {
        self.sources.spans[self.next..self.batch_end()]
            .iter()
            .map(|span| span.content_len * 2)
            .sum()
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut stats = std::mem::take(&mut self.sources.scan_stats);
        if self.next >= self.sources.spans.len() {
            if stats.issue_count() == 0 {
                return Ok(None);
            }
            // Erreurs de lecture d'un fichier sans enregistrement lisible
            return Ok(Some(Chunk {
                features: Vec::new(),
                stats,
                progress: 1.0,
            }));
        }

        let end = self.batch_end();
        let table = self.sources.table();
        let mut features = Vec::with_capacity(end - self.next);

        for index in self.next..end {
            let span = self.sources.spans[index];
            let content = &self.sources.shp[span.content_start..span.content_start + span.content_len];
            match decode_record(content, span.number) {
                Decoded::Null => self.null_records += 1,
                Decoded::Skipped(issue) => stats.record_issue(issue),
                Decoded::Shape { geometry, flags, z, .. } => {
                    let mut properties = match table.as_ref().and_then(|t| t.row(index)) {
                        Some(row) => row,
                        None => {
                            self.missing_rows += 1;
                            Properties::new()
                        }
                    };
                    if let Some(z) = z.and_then(serde_json::Number::from_f64) {
                        properties.entry("z").or_insert(z.into());
                    }
                    let mut feature = CanonicalFeature::new(index as u64, geometry, properties);
                    feature.flags = flags;
                    features.push(feature);
                }
            }
        }

        self.next = end;
        let total = self.sources.spans.len();
        if self.next == total && (self.null_records > 0 || self.missing_rows > 0) {
            debug!(
                file = %self.sources.shp_name,
                null_records = self.null_records,
                missing_rows = self.missing_rows,
                "Shapefile records without geometry or attributes"
            );
        }

        Ok(Some(Chunk {
            features,
            stats,
            progress: self.next as f64 / total as f64,
        }))
    }
}

impl FormatParser for ShapefileParser {
    fn format(&self) -> FormatKind {
        FormatKind::Shapefile
    }

    fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary> {
        let header = parse_header(&files.main.data, &files.main.name)?;
        let sources = Sources::open(files)?;

        let mut entity_types = BTreeMap::new();
        for span in &sources.spans {
            let content = &sources.shp[span.content_start..span.content_start + span.content_len];
            let name = peek_shape_type(content)
                .and_then(ShapeType::from_code)
                .map_or("Unknown", ShapeType::name);
            *entity_types.entry(name.to_string()).or_insert(0usize) += 1;
        }
        let estimated = sources.spans.len();
        let declared_srid = sources.declared_srid;
        let field_names = sources.table().map(|t| t.field_names()).unwrap_or_default();

        let mut producer = ShapefileProducer::new(sources, 0);
        let sample = collect_sample(&mut producer, ANALYZE_SAMPLE_SIZE)?;

        let mut summary = summary_from_sample(FormatKind::Shapefile, sample, declared_srid, Some(header.bounds));
        summary.layers = vec![files.main.base_name()];
        summary.entity_types = entity_types;
        summary.estimated_features = Some(estimated - entity_count(&summary.entity_types, "Null"));
        if !field_names.is_empty() {
            summary.property_names = field_names;
        }
        Ok(summary)
    }

    fn parse(&self, files: &CompanionFileSet, options: &ParseOptions, sink: &ProgressSink) -> Result<Dataset> {
        let sources = Sources::open(files)?;
        let declared_srid = sources.declared_srid;
        let mut producer = ShapefileProducer::new(sources, options.chunk_size);
        let out = StreamProcessor::new(&files.main.name, options, sink).run(&mut producer)?;
        finish_dataset(&files.main.name, out, declared_srid, options)
    }
}

fn entity_count(types: &BTreeMap<String, usize>, name: &str) -> usize {
    types.get(name).copied().unwrap_or(0)
}
