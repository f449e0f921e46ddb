//! Point d'entrée CLI pour geo-import

use anyhow::Result;
use clap::Parser;
use geo_import::PreviewOverrides;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::Commands;

/// Aperçu, reprojection et import de fichiers géospatiaux vers PostGIS
#[derive(Parser)]
#[command(name = "geo-import")]
#[command(author, version)]
#[command(about = "Preview, reproject and import Shapefile, DXF, CSV, XYZ and GeoJSON files into PostGIS")]
#[command(long_about = "Streams geospatial files under a memory budget, builds bounded previews and imports \
selected features through the import_geo_features() endpoint, tracking progress with LISTEN/NOTIFY.\n\n\
Use 'to-geojson' to export without a database.")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Analyze { files } => {
            info!(files = files.len(), "Analyze");
            cli::cmd_analyze(&files).await?;
        }
        Commands::Preview {
            files,
            max,
            srid,
            sample,
            source_srid,
            output,
            config,
        } => {
            info!(files = files.len(), srid = ?srid, "Preview");
            let overrides = PreviewOverrides {
                max_features: max,
                target_srid: srid,
                sample,
            };
            cli::cmd_preview(&files, overrides, source_srid, output.as_deref(), &config).await?;
        }
        Commands::ToGeojson {
            files,
            output,
            srid,
            source_srid,
            config,
        } => {
            info!(output = %output.display(), srid = ?srid, "Export vers GeoJSON");
            cli::cmd_export(&files, &output, srid, source_srid, &config).await?;
        }
        Commands::Import(args) => {
            info!(collection = %args.collection, files = args.files.len(), "Import vers PostGIS");
            cli::cmd_import(args).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
