//! Parsers par format
//!
//! Chaque format implémente [`FormatParser`] ; [`Parser`] les regroupe dans
//! une énumération sélectionnée par le registre.

pub mod delimited;
pub mod dxf;
pub mod geojson;
pub mod shapefile;
pub mod xyz;

use tracing::{info, warn};

use crate::bounds::Bounds;
use crate::companion::CompanionFileSet;
use crate::crs::{detect_srid, CoordinateTransformer};
use crate::error::{LoaderError, Result};
use crate::registry::FormatKind;
use crate::streaming::{
    CancelToken, MemoryBudget, PressureGate, ProgressSink, StreamOutput, DEFAULT_TEXT_CHUNK_SIZE,
};
use crate::types::{Dataset, DatasetMetadata, StructuralSummary};

pub use self::delimited::DelimitedParser;
pub use self::dxf::DxfParser;
pub use self::geojson::GeoJsonParser;
pub use self::shapefile::ShapefileParser;
pub use self::xyz::XyzParser;

/// Nombre maximal de features dans l'échantillon d'`analyze`
pub const ANALYZE_SAMPLE_SIZE: usize = 10;

/// Options d'un parsing complet
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Reprojection pendant le parsing
    pub target_srid: Option<u32>,
    /// SRID source explicite (prioritaire sur le fichier et la détection)
    pub source_srid: Option<u32>,
    /// Nombre maximal de features
    pub max_features: Option<usize>,
    /// Taille cible d'un chunk en octets
    pub chunk_size: usize,
    /// Budget mémoire partagé
    pub memory: Option<MemoryBudget>,
    pub cancel: CancelToken,
    /// Pression mémoire publiée par le moniteur
    pub pressure: PressureGate,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            target_srid: None,
            source_srid: None,
            max_features: None,
            chunk_size: DEFAULT_TEXT_CHUNK_SIZE,
            memory: None,
            cancel: CancelToken::new(),
            pressure: PressureGate::new(),
        }
    }
}

/// Contrat commun des parsers
pub trait FormatParser {
    /// Format pris en charge
    fn format(&self) -> FormatKind;

    fn can_process(&self, files: &CompanionFileSet) -> bool {
        files.format == self.format()
    }

    /// Aperçu structurel borné
    fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary>;

    /// Conversion complète
    fn parse(&self, files: &CompanionFileSet, options: &ParseOptions, sink: &ProgressSink) -> Result<Dataset>;
}

/// Parser sélectionné par format
#[derive(Debug, Clone, Copy)]
pub enum Parser {
    Shapefile(ShapefileParser),
    Dxf(DxfParser),
    Delimited(DelimitedParser),
    PointCloud(XyzParser),
    GeoJson(GeoJsonParser),
}

impl Parser {
    pub fn for_format(kind: FormatKind) -> Self {
        match kind {
            FormatKind::Shapefile => Self::Shapefile(ShapefileParser),
            FormatKind::Dxf => Self::Dxf(DxfParser),
            FormatKind::Delimited => Self::Delimited(DelimitedParser),
            FormatKind::PointCloud => Self::PointCloud(XyzParser),
            FormatKind::GeoJson => Self::GeoJson(GeoJsonParser),
        }
    }

    pub fn for_files(files: &CompanionFileSet) -> Self {
        Self::for_format(files.format)
    }

    fn inner(&self) -> &dyn FormatParser {
        match self {
            Self::Shapefile(p) => p,
            Self::Dxf(p) => p,
            Self::Delimited(p) => p,
            Self::PointCloud(p) => p,
            Self::GeoJson(p) => p,
        }
    }
}

impl FormatParser for Parser {
    fn format(&self) -> FormatKind {
        self.inner().format()
    }

    fn can_process(&self, files: &CompanionFileSet) -> bool {
        self.inner().can_process(files)
    }

    fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary> {
        if !self.can_process(files) {
            return Err(LoaderError::UnsupportedFormat(files.main.name.clone()));
        }
        self.inner().analyze(files)
    }

    fn parse(&self, files: &CompanionFileSet, options: &ParseOptions, sink: &ProgressSink) -> Result<Dataset> {
        if !self.can_process(files) {
            return Err(LoaderError::UnsupportedFormat(files.main.name.clone()));
        }
        info!(file = %files.main.name, format = %self.format(), size = files.total_size(), "Parsing file");
        self.inner().parse(files, options, sink)
    }
}

/// Assemble le dataset final : résolution du SRID et reprojection éventuelle
pub(crate) fn finish_dataset(
    file: &str,
    out: StreamOutput,
    declared_srid: Option<u32>,
    options: &ParseOptions,
) -> Result<Dataset> {
    if out.features.is_empty() && out.stats.issue_count() == 0 {
        return Err(LoaderError::EmptyDataset(file.to_string()));
    }

    let source_srid = options
        .source_srid
        .or(declared_srid)
        .or_else(|| out.bounds.current().and_then(|b| detect_srid(&b)));
    let dataset = Dataset::new(out.features, source_srid, out.stats);

    match (options.target_srid, source_srid) {
        (Some(target), Some(source)) if target != source => {
            let transformer = CoordinateTransformer::new(source, target)?;
            Ok(transformer.transform_dataset(&dataset))
        }
        (Some(target), None) => {
            warn!(file, target, "Source coordinate system unknown, dataset left untransformed");
            Ok(dataset)
        }
        _ => Ok(dataset),
    }
}

/// Résumé de base à partir d'un échantillon
pub(crate) fn summary_from_sample(
    format: FormatKind,
    sample: StreamOutput,
    declared_srid: Option<u32>,
    header_bounds: Option<Bounds>,
) -> StructuralSummary {
    let sample_bounds = sample.bounds.current();
    let detected_srid = declared_srid.or_else(|| header_bounds.or(sample_bounds).and_then(|b| detect_srid(&b)));
    let bounds = header_bounds
        .filter(Bounds::is_valid)
        .unwrap_or_else(|| sample.bounds.finish(detected_srid));
    let metadata = DatasetMetadata::from_features(&sample.features, detected_srid);

    StructuralSummary {
        format,
        layers: Vec::new(),
        entity_types: Default::default(),
        blocks: Vec::new(),
        sample: sample.features,
        bounds,
        detected_srid,
        property_names: metadata.property_names,
        coordinate_columns: None,
        estimated_features: None,
        stats: sample.stats,
    }
}

/// Valeur JSON d'un champ texte : nombre si possible, sinon chaîne
pub(crate) fn typed_value(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return int.into();
    }
    match fast_float::parse::<f64, _>(trimmed) {
        Ok(value) if value.is_finite() => serde_json::Number::from_f64(value)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| trimmed.into()),
        _ => trimmed.into(),
    }
}

/// Nombre fini ou `None`
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    fast_float::parse::<f64, _>(raw.trim()).ok().filter(|v| v.is_finite())
}
