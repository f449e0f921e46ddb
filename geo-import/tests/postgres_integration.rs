//! Tests d'intégration PostgreSQL
//!
//! Ces tests nécessitent une base PostGIS disponible.
//! Configuration via variables d'environnement:
//! - PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE
//!
//! Exécution:
//! ```bash
//! # Avec PostgreSQL local
//! cargo test --test postgres_integration -- --ignored --test-threads=1
//!
//! # Avec Docker
//! docker run -d --name postgres-test -e POSTGRES_PASSWORD=test -p 5432:5432 postgis/postgis
//! PGPASSWORD=test cargo test --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use deadpool_postgres::Pool;
use futures::StreamExt;
use geo::{Geometry, Point};
use geo_import::import::{
    create_pool, test_connection, DatabaseConfig, ImportEndpoint, ImportJob, ImportOrchestrator, ImportRequest,
    OrchestratorConfig, OrchestratorPhase, PgImportEndpoint, PgProgressFeed, ProgressFeed, RunStatus,
};
use geo_import::ImportStatus;
use geo_loader::CanonicalFeature;
use serde_json::{json, Map};

/// Configuration de test
fn test_database() -> DatabaseConfig {
    let mut config = DatabaseConfig::from_env();
    if std::env::var("PGDATABASE").is_err() {
        config.dbname = "geo_test".into();
    }
    config
}

/// Crée le schéma et l'endpoint d'import de test
async fn setup_test_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(
            r#"
            CREATE EXTENSION IF NOT EXISTS postgis;

            DROP TABLE IF EXISTS import_runs CASCADE;
            DROP TABLE IF EXISTS geo_features CASCADE;

            CREATE TABLE import_runs (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                status TEXT NOT NULL DEFAULT 'pending',
                total_features INTEGER NOT NULL DEFAULT 0,
                imported_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                collection_id TEXT,
                layer_id TEXT,
                metadata JSONB
            );

            CREATE TABLE geo_features (
                row_id BIGSERIAL PRIMARY KEY,
                collection TEXT NOT NULL,
                feature_id BIGINT,
                properties JSONB,
                geometry geometry(Geometry, 4326)
            );

            CREATE OR REPLACE FUNCTION notify_import_progress() RETURNS trigger AS $$
            BEGIN
                PERFORM pg_notify('import_progress', row_to_json(NEW)::text);
                RETURN NEW;
            END
            $$ LANGUAGE plpgsql;

            CREATE TRIGGER import_runs_notify
                AFTER INSERT OR UPDATE ON import_runs
                FOR EACH ROW EXECUTE FUNCTION notify_import_progress();

            CREATE OR REPLACE FUNCTION import_geo_features(request JSONB) RETURNS JSONB AS $$
            DECLARE
                run UUID;
                feature JSONB;
                imported INTEGER := 0;
                failed INTEGER := 0;
                errors JSONB := '[]'::jsonb;
                target_collection TEXT := request->>'collectionName';
            BEGIN
                INSERT INTO import_runs (status, total_features, collection_id, layer_id)
                VALUES ('processing', jsonb_array_length(request->'features'), target_collection, target_collection || '-layer')
                RETURNING id INTO run;

                FOR feature IN SELECT * FROM jsonb_array_elements(request->'features') LOOP
                    BEGIN
                        INSERT INTO geo_features (collection, feature_id, properties, geometry)
                        VALUES (
                            target_collection,
                            (feature->>'id')::bigint,
                            feature->'properties',
                            ST_Transform(
                                ST_SetSRID(ST_GeomFromGeoJSON(feature->>'geometry'), (request->>'sourceSrid')::int),
                                4326
                            )
                        );
                        imported := imported + 1;
                    EXCEPTION WHEN others THEN
                        failed := failed + 1;
                        errors := errors || jsonb_build_array(
                            jsonb_build_object('featureId', feature->'id', 'message', SQLERRM)
                        );
                    END;
                END LOOP;

                UPDATE import_runs
                SET status = 'completed', imported_count = imported, failed_count = failed
                WHERE id = run;

                RETURN jsonb_build_object(
                    'importId', run::text,
                    'importedCount', imported,
                    'failedCount', failed,
                    'collectionId', target_collection,
                    'layerId', target_collection || '-layer',
                    'perFeatureErrors', errors
                );
            END
            $$ LANGUAGE plpgsql;
            "#,
        )
        .await?;
    Ok(())
}

fn swiss_points(count: u64) -> Vec<CanonicalFeature> {
    (0..count)
        .map(|i| {
            let mut properties = Map::new();
            properties.insert("name".to_string(), json!(format!("tree {}", i)));
            CanonicalFeature::new(
                i,
                Geometry::Point(Point::new(2_600_000.0 + i as f64 * 10.0, 1_200_000.0)),
                properties,
            )
        })
        .collect()
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_connection_pool() -> Result<()> {
    let pool = create_pool(&test_database()).await?;
    test_connection(&pool).await?;
    Ok(())
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_import_through_orchestrator() -> Result<()> {
    let database = test_database();
    let pool = create_pool(&database).await?;
    setup_test_schema(&pool).await?;

    let orchestrator = ImportOrchestrator::new(
        Arc::new(PgImportEndpoint::new(pool.clone())),
        Arc::new(PgProgressFeed::new(pool.clone(), database)),
        OrchestratorConfig {
            timeout: Duration::from_secs(30),
            ..OrchestratorConfig::default()
        },
    );

    let features = swiss_points(25);
    let outcome = orchestrator
        .run(ImportJob {
            project_file_id: "pf-test".into(),
            collection_name: "trees".into(),
            features: features.iter().collect(),
            source_srid: Some(2056),
            target_srid: 4326,
        })
        .await?;

    assert_eq!(outcome.state.phase, OrchestratorPhase::Completed);
    assert_eq!(outcome.state.imported, 25);
    assert_eq!(outcome.report.status, ImportStatus::Success);
    assert_eq!(outcome.report.layer_id.as_deref(), Some("trees-layer"));

    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT count(*), min(ST_X(geometry)), min(ST_Y(geometry)) FROM geo_features WHERE collection = 'trees'",
            &[],
        )
        .await?;
    let count: i64 = row.get(0);
    let lon: f64 = row.get(1);
    let lat: f64 = row.get(2);
    assert_eq!(count, 25);
    assert!((lon - 7.4386).abs() < 0.01, "lon = {}", lon);
    assert!((lat - 46.9511).abs() < 0.01, "lat = {}", lat);
    Ok(())
}

#[tokio::test]
#[ignore = "Requires PostgreSQL database"]
async fn test_feed_fetch_and_notifications() -> Result<()> {
    let database = test_database();
    let pool = create_pool(&database).await?;
    setup_test_schema(&pool).await?;

    let features = swiss_points(3);
    let endpoint = PgImportEndpoint::new(pool.clone());
    let response = endpoint
        .submit(&ImportRequest::new("pf-test", "lamps", features.iter(), 2056, 4326, 100))
        .await?;
    assert_eq!(response.imported_count, 3);

    let feed = PgProgressFeed::new(pool.clone(), database);
    let row = feed.fetch(&response.import_id).await?.expect("run row");
    assert_eq!(row.status, RunStatus::Completed);
    assert_eq!((row.total_features, row.imported_count), (3, 3));
    assert!(feed.fetch("00000000-0000-0000-0000-000000000000").await?.is_none());

    let mut updates = feed.subscribe(&response.import_id).await?;
    let client = pool.get().await?;
    client
        .execute(
            "UPDATE import_runs SET status = 'failed', metadata = '{\"error\": \"replayed\"}' WHERE id::text = $1",
            &[&response.import_id],
        )
        .await?;

    let update = tokio::time::timeout(Duration::from_secs(5), updates.next())
        .await?
        .expect("notification")?;
    assert_eq!(update.status, RunStatus::Failed);
    assert_eq!(update.metadata.error.as_deref(), Some("replayed"));
    Ok(())
}
