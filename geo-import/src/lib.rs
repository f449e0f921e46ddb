//! # geo-import
//!
//! Aperçu, reprojection et import par lots de fichiers géospatiaux
//! (Shapefile, DXF, CSV, XYZ, GeoJSON) vers PostGIS.
//!
//! ## Features
//!
//! - Parsing en streaming sous budget mémoire (`geo-loader`)
//! - Aperçu borné, simplifié et reprojeté, sélection de features
//! - Import transactionnel suivi par LISTEN/NOTIFY avec repli en polling
//! - Export GeoJSON standalone
//!
//! ## Usage CLI
//!
//! ```bash
//! # Structure d'un fichier
//! geo-import analyze plan.dxf
//!
//! # Aperçu en WGS84
//! geo-import preview parcels.shp parcels.shx parcels.dbf --srid 4326
//!
//! # Import des features 0 à 99 dans une collection
//! geo-import import trees.csv --collection trees --project-file-id pf-12 --select 0-99
//!
//! # Export GeoJSON (sans base de données)
//! geo-import to-geojson ./data/ --output ./geojson/ --srid 4326
//! ```

pub mod config;
pub mod export;
pub mod import;
pub mod pipeline;
pub mod preview;
pub mod report;
pub mod reproject;

pub use config::PipelineConfig;
pub use import::{
    create_pool, DatabaseConfig, ImportBatchState, ImportError, ImportJob, ImportOrchestrator, ImportOutcome,
    OrchestratorConfig, OrchestratorPhase, PgImportEndpoint, PgProgressFeed,
};
pub use pipeline::{Pipeline, PreviewOverrides};
pub use preview::{PreviewManager, PreviewOptions, Sampling};
pub use report::{ImportReport, ImportStatus};
pub use reproject::SmartReprojector;
