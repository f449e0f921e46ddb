//! Parser de texte délimité (CSV, TSV, TXT) avec colonnes de coordonnées
//!
//! Le séparateur est deviné sur la ligne d'en-tête, puis les colonnes X/Y
//! (et Z éventuelle) sont repérées par leur nom. Les lignes sont lues par
//! chunks alignés sur les fins de ligne.

use bytes::Bytes;
use geo::{Geometry, Point};
use serde_json::json;
use tracing::debug;

use super::{
    finish_dataset, parse_number, summary_from_sample, typed_value, FormatParser, ParseOptions, ANALYZE_SAMPLE_SIZE,
};
use crate::companion::CompanionFileSet;
use crate::error::{LoaderError, Result};
use crate::registry::FormatKind;
use crate::stats::{IssueKind, ProcessorStats};
use crate::streaming::{collect_sample, decode_text, Chunk, ChunkProducer, ChunkReader, ProgressSink, StreamProcessor};
use crate::types::{CanonicalFeature, CoordinateColumns, Dataset, Properties, StructuralSummary};

/// Séparateurs candidats, par ordre de préférence en cas d'égalité
pub const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Noms exacts reconnus, par axe
const X_NAMES: &[&str] = &["x", "lon", "lng", "long", "longitude", "easting", "east", "e"];
const Y_NAMES: &[&str] = &["y", "lat", "latitude", "northing", "north", "n"];
const Z_NAMES: &[&str] = &["z", "elevation", "elev", "height", "alt", "altitude", "h"];

/// Fragments reconnus à l'intérieur d'un nom, du plus au moins spécifique
const X_FRAGMENTS: &[&str] = &["longitude", "easting", "lon", "lng", "x"];
const Y_FRAGMENTS: &[&str] = &["latitude", "northing", "lat", "y"];
const Z_FRAGMENTS: &[&str] = &["elevation", "altitude", "z"];

#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedParser;

/// Devine le séparateur d'après la ligne d'en-tête (hors guillemets)
pub fn sniff_delimiter(header: &str) -> u8 {
    let mut counts = [0usize; DELIMITERS.len()];
    let mut quoted = false;
    for byte in header.bytes() {
        if byte == b'"' {
            quoted = !quoted;
        } else if !quoted {
            if let Some(i) = DELIMITERS.iter().position(|&d| d == byte) {
                counts[i] += 1;
            }
        }
    }
    // Premier maximum : l'ordre de DELIMITERS tranche les égalités
    let mut best = 0;
    for i in 1..DELIMITERS.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    DELIMITERS[best]
}

fn normalized(name: &str) -> String {
    name.trim().trim_matches('"').to_ascii_lowercase()
}

/// Colonne d'un axe : nom exact d'abord, puis fragment contenu dans le nom
fn find_axis(names: &[String], exact: &[&str], fragments: &[&str], taken: &[usize]) -> Option<usize> {
    let free = |i: &usize| !taken.contains(i);
    exact
        .iter()
        .find_map(|candidate| (0..names.len()).filter(free).find(|&i| names[i] == *candidate))
        .or_else(|| {
            fragments
                .iter()
                .find_map(|fragment| (0..names.len()).filter(free).find(|&i| names[i].contains(fragment)))
        })
}

/// Repère les colonnes de coordonnées dans un en-tête
pub fn detect_columns(headers: &[String]) -> Option<CoordinateColumns> {
    let names: Vec<String> = headers.iter().map(|h| normalized(h)).collect();
    let x = find_axis(&names, X_NAMES, X_FRAGMENTS, &[])?;
    let y = find_axis(&names, Y_NAMES, Y_FRAGMENTS, &[x])?;
    let z = find_axis(&names, Z_NAMES, Z_FRAGMENTS, &[x, y]);
    Some(CoordinateColumns {
        x,
        y,
        z,
        x_name: headers[x].trim().to_string(),
        y_name: headers[y].trim().to_string(),
    })
}

/// En-tête décodé d'un fichier délimité
struct Header {
    delimiter: u8,
    names: Vec<String>,
    columns: CoordinateColumns,
    /// Position du premier octet de données
    data_offset: usize,
}

fn read_header(file: &str, data: &Bytes) -> Result<Header> {
    let reader = ChunkReader::new(data.clone(), 1);
    let Some((line, data_offset)) = reader.first_line() else {
        return Err(LoaderError::EmptyDataset(file.to_string()));
    };
    let text = decode_text(&line);
    let delimiter = if file.to_ascii_lowercase().ends_with(".tsv") {
        b'\t'
    } else {
        sniff_delimiter(&text)
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_reader(text.as_bytes());
    let names: Vec<String> = match csv_reader.records().next() {
        Some(record) => record?.iter().map(|s| s.trim().to_string()).collect(),
        None => Vec::new(),
    };

    let columns = detect_columns(&names).ok_or_else(|| LoaderError::NoCoordinateColumns {
        file: file.to_string(),
        headers: names.clone(),
    })?;
    debug!(
        file,
        delimiter = %(delimiter as char).escape_default(),
        x = %columns.x_name,
        y = %columns.y_name,
        "Coordinate columns detected"
    );

    Ok(Header {
        delimiter,
        names,
        columns,
        data_offset,
    })
}

/// Producteur : un chunk de lignes par appel
struct DelimitedProducer {
    header: Header,
    reader: ChunkReader,
    /// Numéro de la prochaine ligne de données (l'en-tête est la ligne 1)
    row: usize,
}

impl DelimitedProducer {
    fn new(header: Header, data: Bytes, chunk_size: usize) -> Self {
        let reader = ChunkReader::new(data, chunk_size).starting_at(header.data_offset);
        Self { header, reader, row: 2 }
    }

    fn convert_row(&self, record: &csv::ByteRecord, row: usize, stats: &mut ProcessorStats) -> Option<CanonicalFeature> {
        let columns = &self.header.columns;
        let field = |i: usize| record.get(i).map(decode_text);
        let coordinate = |i: usize| field(i).as_deref().and_then(parse_number);

        let (Some(x), Some(y)) = (coordinate(columns.x), coordinate(columns.y)) else {
            stats.issue(
                IssueKind::InvalidCoordinates,
                format!("Row {}: missing or non-numeric coordinates", row),
                json!({
                    "row": row,
                    "x": field(columns.x).map(|s| s.into_owned()),
                    "y": field(columns.y).map(|s| s.into_owned()),
                }),
            );
            return None;
        };
        let z = columns.z.and_then(coordinate);

        let mut properties = Properties::new();
        for (i, name) in self.header.names.iter().enumerate() {
            if i == columns.x || i == columns.y || Some(i) == columns.z {
                continue;
            }
            if let Some(value) = field(i) {
                properties.insert(name.clone(), typed_value(&value));
            }
        }

        let mut feature = CanonicalFeature::new(0, Geometry::Point(Point::new(x, y)), properties);
        if let Some(z) = z {
            feature.flags.has_z = true;
            if let Some(number) = serde_json::Number::from_f64(z) {
                feature.properties.entry("z").or_insert(number.into());
            }
        }
        Some(feature)
    }
}

impl ChunkProducer for DelimitedProducer {
    fn total_bytes(&self) -> usize {
        self.reader.total_len()
    }

    fn next_chunk_size(&self) -> usize {
        // Texte source plus les features construites
        self.reader.next_len() * 4
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let Some(chunk) = self.reader.next() else {
            return Ok(None);
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(self.header.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(&chunk[..]);

        let mut features = Vec::new();
        let mut stats = ProcessorStats::new();
        let mut record = csv::ByteRecord::new();
        // Le lecteur csv saute les lignes vides : numéro pris sur sa position
        let first_line = self.row;
        while csv_reader.read_byte_record(&mut record)? {
            let row = record
                .position()
                .map_or(first_line, |position| first_line + position.line() as usize - 1);
            if record.iter().all(|f| f.iter().all(u8::is_ascii_whitespace)) {
                continue;
            }
            if let Some(feature) = self.convert_row(&record, row, &mut stats) {
                features.push(feature);
            }
        }

        self.row = first_line + memchr::memchr_iter(b'\n', &chunk).count();

        Ok(Some(Chunk {
            features,
            stats,
            progress: self.reader.progress(),
        }))
    }
}

impl FormatParser for DelimitedParser {
    fn format(&self) -> FormatKind {
        FormatKind::Delimited
    }

    fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary> {
        let header = read_header(&files.main.name, &files.main.data)?;
        let columns = header.columns.clone();
        let names = header.names.clone();

        let mut producer = DelimitedProducer::new(header, files.main.data.clone(), 4096);
        let sample = collect_sample(&mut producer, ANALYZE_SAMPLE_SIZE)?;
        let rows = sample.features.len() + sample.stats.issue_count();

        let mut summary = summary_from_sample(FormatKind::Delimited, sample, None, None);
        summary.layers = vec![files.main.base_name()];
        summary.entity_types.insert("row".to_string(), rows);
        summary.property_names = names
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != columns.x && *i != columns.y && Some(*i) != columns.z)
            .map(|(_, name)| name)
            .collect();
        summary.coordinate_columns = Some(columns);
        Ok(summary)
    }

    fn parse(&self, files: &CompanionFileSet, options: &ParseOptions, sink: &ProgressSink) -> Result<Dataset> {
        let header = read_header(&files.main.name, &files.main.data)?;
        let mut producer = DelimitedProducer::new(header, files.main.data.clone(), options.chunk_size);
        let out = StreamProcessor::new(&files.main.name, options, sink).run(&mut producer)?;
        finish_dataset(&files.main.name, out, None, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::{resolve_one, FileRef};

    fn names(headers: &[&str]) -> Vec<String> {
        headers.iter().map(|h| h.to_string()).collect()
    }

    fn csv_file(name: &str, text: &str) -> CompanionFileSet {
        resolve_one(&[FileRef::new(name, text.as_bytes().to_vec())]).unwrap()
    }

    #[test]
    fn test_issue_rows_follow_file_lines() {
        let files = csv_file("stations.csv", "name;lat;lon\nBern;46.95;7.44\n\n\nBroken;;7.0\n\nChur;46.85;9.53\nLost;x;y\n");
        let options = ParseOptions {
            chunk_size: 16,
            ..ParseOptions::default()
        };
        let dataset = DelimitedParser.parse(&files, &options, &ProgressSink::new()).unwrap();
        assert_eq!(dataset.len(), 2);
        let rows: Vec<&serde_json::Value> = dataset.stats.errors.iter().map(|e| &e.details["row"]).collect();
        assert_eq!(rows, vec![&json!(5), &json!(8)]);
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("name;lat;lon"), b';');
        assert_eq!(sniff_delimiter("name\tlat\tlon"), b'\t');
        assert_eq!(sniff_delimiter("\"a;b\",lat,lon"), b',');
        assert_eq!(sniff_delimiter("single"), b',');
    }

    #[test]
    fn test_detect_columns() {
        let columns = detect_columns(&names(&["Name", "Latitude", "Longitude", "Elevation"])).unwrap();
        assert_eq!((columns.x, columns.y, columns.z), (2, 1, Some(3)));

        // Le nom exact l'emporte sur le fragment ("year" contient "y")
        let columns = detect_columns(&names(&["year", "X", "Y"])).unwrap();
        assert_eq!((columns.x, columns.y), (1, 2));

        let columns = detect_columns(&names(&["id", "coord_x", "coord_y"])).unwrap();
        assert_eq!((columns.x, columns.y, columns.z), (1, 2, None));

        assert!(detect_columns(&names(&["name", "value"])).is_none());
    }

    #[test]
    fn test_parse_rows_and_invalid_coordinates() {
        let files = csv_file(
            "stations.csv",
            "name;lat;lon;elevation;active\r\nBern;46.95;7.44;540;true\r\nBroken;;7.0;1;false\r\nChur;46.85;9.53;593;true\r\n",
        );
        let dataset = DelimitedParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.stats.count_of(IssueKind::InvalidCoordinates), 1);
        assert_eq!(dataset.stats.errors[0].details["row"], 3);
        let bern = &dataset.features[0];
        assert_eq!(bern.properties["name"], "Bern");
        assert_eq!(bern.properties["z"], json!(540.0));
        assert!(bern.flags.has_z);
        assert!(!bern.properties.contains_key("lat"));
        assert_eq!(dataset.metadata.source_srid, Some(4326));
    }

    #[test]
    fn test_small_chunks_keep_row_numbers() {
        let mut text = String::from("x,y,label\n");
        for i in 0..50 {
            text.push_str(&format!("{},{},p{}\n", 2_600_000 + i, 1_200_000 + i, i));
        }
        let files = csv_file("points.csv", &text);
        let options = ParseOptions {
            chunk_size: 64,
            ..ParseOptions::default()
        };
        let dataset = DelimitedParser.parse(&files, &options, &ProgressSink::new()).unwrap();
        assert_eq!(dataset.len(), 50);
        assert_eq!(dataset.features[49].properties["label"], "p49");
        assert_eq!(dataset.metadata.source_srid, Some(2056));
    }

    #[test]
    fn test_no_coordinate_columns() {
        let files = csv_file("table.csv", "name,value\na,1\n");
        let err = DelimitedParser
            .parse(&files, &ParseOptions::default(), &ProgressSink::new())
            .unwrap_err();
        assert!(matches!(err, LoaderError::NoCoordinateColumns { .. }));
    }

    #[test]
    fn test_analyze_reports_columns() {
        let files = csv_file("stations.tsv", "id\teasting\tnorthing\n1\t2600000\t1200000\n");
        let summary = DelimitedParser.analyze(&files).unwrap();
        let columns = summary.coordinate_columns.unwrap();
        assert_eq!((columns.x_name.as_str(), columns.y_name.as_str()), ("easting", "northing"));
        assert_eq!(summary.property_names, vec!["id"]);
        assert_eq!(summary.detected_srid, Some(2056));
        assert_eq!(summary.sample.len(), 1);
    }
}
