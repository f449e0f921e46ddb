//! Parser de nuages de points texte (XYZ, PTS)
//!
//! Une ligne = un point `x y z [valeurs...]`, séparé par des espaces,
//! tabulations, virgules ou points-virgules. Une première ligne non
//! numérique est prise comme en-tête.

use bytes::Bytes;
use geo::{Geometry, Point};
use serde_json::json;

use super::delimited::detect_columns;
use super::{
    finish_dataset, parse_number, summary_from_sample, typed_value, FormatParser, ParseOptions, ANALYZE_SAMPLE_SIZE,
};
use crate::companion::CompanionFileSet;
use crate::error::{LoaderError, Result};
use crate::registry::FormatKind;
use crate::stats::{IssueKind, ProcessorStats};
use crate::streaming::chunk::lines;
use crate::streaming::{collect_sample, decode_text, Chunk, ChunkProducer, ChunkReader, ProgressSink, StreamProcessor};
use crate::types::{CanonicalFeature, CoordinateColumns, Dataset, Properties, StructuralSummary};

#[derive(Debug, Clone, Copy, Default)]
pub struct XyzParser;

fn fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|s| !s.is_empty())
}

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('#') || line.starts_with("//")
}

/// Disposition des colonnes
#[derive(Debug, Clone)]
struct Layout {
    columns: CoordinateColumns,
    /// Noms issus de l'en-tête (vide sans en-tête)
    names: Vec<String>,
    data_offset: usize,
}

impl Layout {
    fn positional(data_offset: usize) -> Self {
        Self {
            columns: CoordinateColumns {
                x: 0,
                y: 1,
                z: Some(2),
                x_name: "x".into(),
                y_name: "y".into(),
            },
            names: Vec::new(),
            data_offset,
        }
    }

    /// Nom de la colonne `i` pour les valeurs additionnelles
    fn name_of(&self, i: usize, extra_rank: usize) -> String {
        self.names
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("value{}", extra_rank))
    }
}

fn read_layout(data: &Bytes) -> Layout {
    let reader = ChunkReader::new(data.clone(), 1);
    let Some((line, next)) = reader.first_line() else {
        return Layout::positional(0);
    };
    let text = decode_text(&line);
    let first: Vec<&str> = fields(&text).collect();
    if is_comment(&text) || first.is_empty() || first.iter().any(|f| parse_number(f).is_some()) {
        return Layout::positional(0);
    }

    let names: Vec<String> = first.iter().map(|s| s.to_string()).collect();
    let mut layout = Layout::positional(next);
    if let Some(columns) = detect_columns(&names) {
        layout.columns = columns;
    }
    layout.names = names;
    layout
}

struct XyzProducer {
    layout: Layout,
    reader: ChunkReader,
    line: usize,
}

impl XyzProducer {
    fn new(layout: Layout, data: Bytes, chunk_size: usize) -> Self {
        let reader = ChunkReader::new(data, chunk_size).starting_at(layout.data_offset);
        let line = if layout.data_offset > 0 { 2 } else { 1 };
        Self { layout, reader, line }
    }

    fn convert_line(&self, text: &str, line: usize, stats: &mut ProcessorStats) -> Option<CanonicalFeature> {
        let values: Vec<&str> = fields(text).collect();
        let columns = &self.layout.columns;
        let number = |i: usize| values.get(i).copied().and_then(parse_number);

        let (Some(x), Some(y)) = (number(columns.x), number(columns.y)) else {
            stats.issue(
                IssueKind::InvalidCoordinates,
                format!("Line {}: missing or non-numeric coordinates", line),
                json!({ "line": line, "content": text.chars().take(80).collect::<String>() }),
            );
            return None;
        };

        let z = columns.z.and_then(number);
        let mut properties = Properties::new();
        let mut extra_rank = 0;
        for (i, raw) in values.iter().enumerate() {
            if i == columns.x || i == columns.y || Some(i) == columns.z {
                continue;
            }
            extra_rank += 1;
            properties.insert(self.layout.name_of(i, extra_rank), typed_value(raw));
        }

        let mut feature = CanonicalFeature::new(0, Geometry::Point(Point::new(x, y)), properties);
        if let Some(z) = z.and_then(serde_json::Number::from_f64) {
            feature.flags.has_z = true;
            feature.properties.entry("z").or_insert(z.into());
        }
        Some(feature)
    }
}

impl ChunkProducer for XyzProducer {
    fn total_bytes(&self) -> usize {
        self.reader.total_len()
    }

    fn next_chunk_size(&self) -> usize {
        self.reader.next_len() * 4
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let Some(chunk) = self.reader.next() else {
            return Ok(None);
        };
        let text = decode_text(&chunk);
        let mut features = Vec::new();
        let mut stats = ProcessorStats::new();

        for raw in lines(&text) {
            let line = self.line;
            self.line += 1;
            if raw.trim().is_empty() || is_comment(raw) {
                continue;
            }
            if let Some(feature) = self.convert_line(raw, line, &mut stats) {
                features.push(feature);
            }
        }

        Ok(Some(Chunk {
            features,
            stats,
            progress: self.reader.progress(),
        }))
    }
}

impl FormatParser for XyzParser {
    fn format(&self) -> FormatKind {
        FormatKind::PointCloud
    }

    fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary> {
        if files.main.is_empty() {
            return Err(LoaderError::EmptyDataset(files.main.name.clone()));
        }
        let layout = read_layout(&files.main.data);
        let columns = layout.columns.clone();
        let mut producer = XyzProducer::new(layout, files.main.data.clone(), 4096);
        let sample = collect_sample(&mut producer, ANALYZE_SAMPLE_SIZE)?;

        let mut summary = summary_from_sample(FormatKind::PointCloud, sample, None, None);
        summary.layers = vec![files.main.base_name()];
        summary.entity_types.insert("point".to_string(), summary.sample.len());
        summary.coordinate_columns = Some(columns);
        Ok(summary)
    }

    fn parse(&self, files: &CompanionFileSet, options: &ParseOptions, sink: &ProgressSink) -> Result<Dataset> {
        let layout = read_layout(&files.main.data);
        let mut producer = XyzProducer::new(layout, files.main.data.clone(), options.chunk_size);
        let out = StreamProcessor::new(&files.main.name, options, sink).run(&mut producer)?;
        finish_dataset(&files.main.name, out, None, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::{resolve_one, FileRef};

    fn cloud(name: &str, text: &str) -> CompanionFileSet {
        resolve_one(&[FileRef::new(name, text.as_bytes().to_vec())]).unwrap()
    }

    #[test]
    fn test_plain_rows_with_extra_values() {
        let files = cloud("scan.xyz", "2600000.5 1200000.25 540.1 255 128\n2600001 1200001 541\n\n# comment\n");
        let dataset = XyzParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();
        assert_eq!(dataset.len(), 2);
        let first = &dataset.features[0];
        assert!(first.flags.has_z);
        assert_eq!(first.properties["z"], json!(540.1));
        assert_eq!(first.properties["value1"], json!(255));
        assert_eq!(first.properties["value2"], json!(128));
        assert_eq!(dataset.metadata.source_srid, Some(2056));
    }

    #[test]
    fn test_header_names_columns() {
        let files = cloud("scan.pts", "lon,lat,height,intensity\n7.44,46.95,540,12\nbad,row,1,1\n");
        let dataset = XyzParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.features[0].properties["intensity"], json!(12));
        assert_eq!(dataset.stats.count_of(IssueKind::InvalidCoordinates), 1);
        assert_eq!(dataset.stats.errors[0].details["line"], 3);
    }

    #[test]
    fn test_issue_lines_count_blank_lines() {
        let files = cloud("scan.xyz", "1 2 3\n\n# note\r\n\nfoo bar\n4 5 6\n");
        let options = ParseOptions {
            chunk_size: 8,
            ..ParseOptions::default()
        };
        let dataset = XyzParser.parse(&files, &options, &ProgressSink::new()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.stats.errors[0].details["line"], 5);
    }

    #[test]
    fn test_analyze() {
        let files = cloud("scan.xyz", "1 2 3\n4 5 6\n");
        let summary = XyzParser.analyze(&files).unwrap();
        assert_eq!(summary.sample.len(), 2);
        assert_eq!(summary.coordinate_columns.map(|c| c.z), Some(Some(2)));
    }
}
