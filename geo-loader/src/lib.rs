//! # geo-loader
//!
//! Parsers de fichiers géographiques vers un jeu de features normalisé.
//!
//! ## Features
//!
//! - Shapefile (.shp/.shx/.dbf, .prj et .cpg optionnels), DXF, CSV/TSV,
//!   nuages de points XYZ et GeoJSON
//! - Traitement par chunks avec budget mémoire, progression et annulation
//! - Détection du système de coordonnées (LV95, LV03, WGS84) et
//!   reprojection suisse sans dépendance native
//! - Types `geo` pour l'interopérabilité avec l'écosystème Rust géospatial
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geo_loader::{FileRef, Loader, ParseOptions, ProgressSink};
//! use std::path::Path;
//!
//! let loader = Loader::new();
//! let files = [
//!     FileRef::from_path(Path::new("roads.shp"))?,
//!     FileRef::from_path(Path::new("roads.shx"))?,
//!     FileRef::from_path(Path::new("roads.dbf"))?,
//! ];
//! for set in loader.resolve(&files)? {
//!     let dataset = loader.parse_blocking(&set, &ParseOptions::default(), &ProgressSink::new())?;
//!     println!("{}: {} features, EPSG {:?}", set.main.name, dataset.len(), dataset.metadata.source_srid);
//! }
//! ```

pub mod bounds;
pub mod companion;
pub mod crs;
pub mod error;
pub mod loader;
pub mod parsers;
pub mod registry;
pub mod stats;
pub mod streaming;
pub mod types;

pub use bounds::{Bounds, BoundsAccumulator};
pub use companion::{resolve, resolve_one, CompanionFileSet, FileRef};
pub use crs::{detect_srid, CoordinateTransformer};
pub use error::{LoaderError, Result};
pub use loader::Loader;
pub use parsers::{FormatParser, ParseOptions, Parser};
pub use registry::{FormatKind, FormatSpec};
pub use stats::{IssueKind, ProcessingIssue, ProcessorStats};
pub use streaming::{CancelToken, MemoryBudget, MemoryMonitor, ProgressEvent, ProgressSink};
pub use types::{CanonicalFeature, Dataset, DatasetMetadata, GeometryKind, Properties, StructuralSummary, ValidationFlags};

use std::path::Path;

/// Lit des fichiers depuis le disque, les regroupe et parse chaque ensemble
///
/// Les erreurs d'un ensemble n'interrompent pas les suivants : chaque
/// résultat est renvoyé avec le nom de son fichier principal.
///
/// # Errors
///
/// Retourne `LoaderError` si un fichier est illisible ou si le regroupement
/// échoue (compagnon obligatoire manquant, format inconnu).
pub fn parse_paths(paths: &[&Path], options: &ParseOptions) -> Result<Vec<(String, Result<Dataset>)>> {
    let files = paths.iter().map(|p| FileRef::from_path(p)).collect::<Result<Vec<_>>>()?;
    let loader = Loader::new();
    let sets = loader.resolve(&files)?;

    Ok(sets
        .iter()
        .map(|set| {
            let sink = ProgressSink::new();
            (set.main.name.clone(), loader.parse_blocking(set, options, &sink))
        })
        .collect())
}
