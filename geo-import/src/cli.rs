//! Définition et implémentation des commandes CLI
//!
//! - `analyze` : structure des fichiers sans parsing complet
//! - `preview` : aperçu borné (simplifié, reprojeté)
//! - `to-geojson` : export GeoJSON (sans DB)
//! - `import` : import par lots vers PostGIS avec suivi de progression

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use geo_import::export::export_dataset;
use geo_import::import::{
    create_pool, test_connection, DatabaseConfig, ImportJob, ImportOrchestrator, PgImportEndpoint, PgProgressFeed,
    SslMode,
};
use geo_import::pipeline::parse_selection;
use geo_import::{ImportReport, ImportStatus, Pipeline, PipelineConfig, PreviewOverrides, SmartReprojector};
use tracing::{info, warn};

#[derive(Subcommand)]
pub enum Commands {
    /// Show the structure of files (layers, entity types, SRID) without a full parse
    Analyze {
        /// Files or directories (companions such as .shx/.dbf/.prj alongside)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Parse files and print a bounded, simplified preview
    Preview {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Maximum number of preview features
        #[arg(long)]
        max: Option<usize>,

        /// Preview SRID (e.g., 4326 for WGS84)
        #[arg(long)]
        srid: Option<u32>,

        /// Sample evenly instead of keeping the first features
        #[arg(long)]
        sample: bool,

        /// Source SRID when the file does not declare one
        #[arg(long)]
        source_srid: Option<u32>,

        /// Write the preview as GeoJSON into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Config preset name (default/low-memory) or path to a JSON config
        #[arg(long, default_value = "default")]
        config: String,
    },

    /// Export files to GeoJSON (no database required)
    ToGeojson {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output directory for GeoJSON files
        #[arg(short, long)]
        output: PathBuf,

        /// Target SRID for reprojection (e.g., 4326 for WGS84)
        #[arg(long)]
        srid: Option<u32>,

        /// Source SRID when the file does not declare one
        #[arg(long)]
        source_srid: Option<u32>,

        #[arg(long, default_value = "default")]
        config: String,
    },

    /// Import features into PostGIS through the import_geo_features() endpoint
    Import(ImportArgs),
}

#[derive(Args)]
pub struct ImportArgs {
    /// Main file and its companions
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Target collection name
    #[arg(long)]
    pub collection: String,

    /// Project file identifier forwarded to the endpoint
    #[arg(long)]
    pub project_file_id: String,

    /// Target SRID (défaut : config targetSrid, sinon SRID source)
    #[arg(long)]
    pub srid: Option<u32>,

    /// Source SRID when the file does not declare one
    #[arg(long)]
    pub source_srid: Option<u32>,

    /// Feature ids to import, e.g. "0,4,10-20" (défaut : toutes)
    #[arg(long)]
    pub select: Option<String>,

    /// Batch size forwarded to the endpoint
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, default_value = "default")]
    pub config: String,

    /// Save the import report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / geo)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<String>,
}

/// Exécute la commande analyze
pub async fn cmd_analyze(files: &[PathBuf]) -> Result<()> {
    let pipeline = Pipeline::new(PipelineConfig::default());
    for set in pipeline.resolve(files)? {
        let summary = pipeline.loader().analyze(&set)?;
        println!("\n{} ({})", set.main.name, set.spec().description);
        println!("  Size: {} bytes", set.total_size());
        match summary.detected_srid {
            Some(srid) => println!("  SRID: EPSG:{} ({})", srid, geo_loader::crs::srid_label(srid)),
            None => println!("  SRID: unknown"),
        }
        let b = summary.bounds;
        println!("  Bounds: [{:.6}, {:.6}, {:.6}, {:.6}]", b.min_x, b.min_y, b.max_x, b.max_y);
        if let Some(estimated) = summary.estimated_features {
            println!("  Features (estimated): {}", estimated);
        }
        if !summary.layers.is_empty() {
            println!("  Layers: {}", summary.layers.join(", "));
        }
        for (entity, count) in &summary.entity_types {
            println!("    {}: {}", entity, count);
        }
        if !summary.blocks.is_empty() {
            println!("  Blocks: {}", summary.blocks.join(", "));
        }
        if !summary.property_names.is_empty() {
            println!("  Properties: {}", summary.property_names.join(", "));
        }
        if summary.stats.issue_count() > 0 {
            println!("  Issues in sample: {}", summary.stats.issue_count());
        }
    }
    Ok(())
}

/// Exécute la commande preview
pub async fn cmd_preview(
    files: &[PathBuf],
    overrides: PreviewOverrides,
    source_srid: Option<u32>,
    output: Option<&Path>,
    config_spec: &str,
) -> Result<()> {
    let config = PipelineConfig::resolve(config_spec)?;
    let mut pipeline = Pipeline::new(config);
    pipeline.start_monitor();

    if let Some(output) = output {
        std::fs::create_dir_all(output)?;
    }

    for set in pipeline.resolve(files)? {
        let name = set.main.name.clone();
        let base = set.main.base_name();
        let dataset = Arc::new(pipeline.parse(set, source_srid).await?);
        let manager = pipeline.preview(Arc::clone(&dataset), overrides.clone())?;
        let preview = manager.preview();

        println!("\n{}", name);
        println!(
            "  Features: {} of {} ({:?})",
            preview.len(),
            dataset.len(),
            manager.options().sampling
        );
        println!("  Geometry types: {:?}", preview.metadata.geometry_types);
        println!("  SRID: {:?}", preview.metadata.source_srid);
        let b = preview.metadata.bounds;
        println!("  Bounds: [{:.6}, {:.6}, {:.6}, {:.6}]", b.min_x, b.min_y, b.max_x, b.max_y);
        for feature in preview.features.iter().take(5) {
            println!("    #{} {:?} {}", feature.id, feature.kind(), serde_json::Value::Object(feature.properties.clone()));
        }

        if let Some(output) = output {
            let path = output.join(format!("{}.preview.geojson", base));
            let count = export_dataset(preview, preview.metadata.source_srid, &path)?;
            info!(path = %path.display(), features = count, "Preview written");
        }
    }
    Ok(())
}

/// Exécute la commande to-geojson
pub async fn cmd_export(
    files: &[PathBuf],
    output: &Path,
    target_srid: Option<u32>,
    source_srid: Option<u32>,
    config_spec: &str,
) -> Result<()> {
    let config = PipelineConfig::resolve(config_spec)?;
    let mut pipeline = Pipeline::new(config);
    pipeline.start_monitor();
    std::fs::create_dir_all(output)?;

    for set in pipeline.resolve(files)? {
        let base = set.main.base_name();
        let dataset = pipeline.parse(set, source_srid).await?;
        let source = dataset.metadata.source_srid;

        let (dataset, srid) = match (target_srid, source) {
            (Some(target), Some(source)) if target != source => {
                let reprojector = SmartReprojector::new(source, target)?;
                info!(from = source, to = target, backend = reprojector.description(), "Reprojecting");
                (reprojector.transform_dataset(&dataset)?, Some(target))
            }
            (Some(target), None) => {
                warn!(file = %base, target, "Source SRID unknown, exporting source coordinates");
                (dataset, None)
            }
            _ => (dataset, source),
        };

        let path = output.join(format!("{}.geojson", base));
        let count = export_dataset(&dataset, srid, &path)?;
        info!(path = %path.display(), features = count, srid = ?srid, "GeoJSON written");
    }
    Ok(())
}

/// Exécute la commande import
pub async fn cmd_import(args: ImportArgs) -> Result<()> {
    let start = Instant::now();
    let config = PipelineConfig::resolve(&args.config)?;
    let mut orchestrator_config = config.orchestrator_config();
    if let Some(batch_size) = args.batch_size {
        orchestrator_config.batch_size = batch_size.max(1);
    }

    let mut pipeline = Pipeline::new(config);
    pipeline.start_monitor();
    let mut sets = pipeline.resolve(&args.files)?;
    if sets.len() != 1 {
        anyhow::bail!("Import expects a single main file, got {}", sets.len());
    }
    let set = sets.remove(0);
    let source_name = set.main.name.clone();

    // le dataset complet reste en SRID source ; seul l'aperçu est reprojeté
    let dataset = Arc::new(pipeline.parse(set, args.source_srid).await?);
    let source_srid = dataset.metadata.source_srid;
    let target_srid = args
        .srid
        .or(pipeline.config().target_srid)
        .or(source_srid)
        .unwrap_or(4326);

    let overrides = PreviewOverrides {
        target_srid: Some(target_srid),
        ..PreviewOverrides::default()
    };
    let mut manager = pipeline.preview(Arc::clone(&dataset), overrides)?;
    match &args.select {
        Some(spec) => manager.select(parse_selection(spec)?)?,
        None => manager.select_all(),
    }
    info!(
        selected = manager.selection().len(),
        total = dataset.len(),
        preview = manager.preview().len(),
        "Selection ready"
    );

    let mut database = DatabaseConfig::from_env();
    let ssl_mode = args
        .ssl
        .as_deref()
        .map(|s| s.parse::<SslMode>().map_err(anyhow::Error::msg))
        .transpose()?;
    database.apply_overrides(args.host, args.port, args.database, args.user, args.password, ssl_mode);
    info!(host = %database.host, port = database.port, dbname = %database.dbname, "Connecting to PostgreSQL");

    let pool = create_pool(&database).await?;
    test_connection(&pool).await.context("Database unreachable")?;

    let orchestrator = ImportOrchestrator::new(
        Arc::new(PgImportEndpoint::new(pool.clone())),
        Arc::new(PgProgressFeed::new(pool, database)),
        orchestrator_config,
    );

    let mut updates = orchestrator.subscribe();
    let watcher = tokio::spawn(async move {
        let mut phase = updates.borrow().phase;
        let mut reported = 0.0;
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if state.phase != phase {
                phase = state.phase;
                info!(phase = ?phase, "Import phase");
            }
            if state.progress() - reported >= 0.1 {
                reported = state.progress();
                info!(imported = state.imported, failed = state.failed, total = state.total, "Import {:.0}%", reported * 100.0);
            }
            if phase.is_terminal() {
                break;
            }
        }
    });

    let job = ImportJob {
        project_file_id: args.project_file_id,
        collection_name: args.collection.clone(),
        features: manager.selected_features(),
        source_srid,
        target_srid,
    };

    let mut report = match orchestrator.run(job).await {
        Ok(outcome) => outcome.report,
        Err(e) => {
            let mut report = ImportReport::new(&args.collection);
            report.source_srid = source_srid;
            report.target_srid = Some(target_srid);
            report.record_state(&orchestrator.state());
            report.record_failure(&e);
            report
        }
    };
    watcher.abort();

    report.record_parse(&source_name, &dataset);
    report.set_duration(start.elapsed());
    report.finalize();
    report.display();

    if let Some(path) = &args.report {
        report.save_to_file(path)?;
        info!(path = %path.display(), "Report saved");
    }

    match report.status {
        ImportStatus::Success | ImportStatus::PartialSuccess => {
            info!("{}", report.summary());
            Ok(())
        }
        ImportStatus::Failed | ImportStatus::TimedOut => anyhow::bail!("{}", report.summary()),
    }
}
