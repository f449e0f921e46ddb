//! Endpoint et suivi de progression adossés à PostgreSQL
//!
//! L'import est confié à la fonction stockée `import_geo_features(jsonb)`,
//! qui crée un run dans `import_runs` et notifie son avancement sur le canal
//! `import_progress` (`pg_notify` avec la ligne du run en JSON).

use async_trait::async_trait;
use deadpool_postgres::Pool;
use futures::{stream, StreamExt};
use serde_json::Value;
use tokio_postgres::AsyncMessage;
use tracing::{debug, warn};

use super::endpoint::{ImportEndpoint, ImportRequest, ImportResponse};
use super::feed::{ProgressFeed, ProgressRow, ProgressStream};
use super::pool::{connect_listener, DatabaseConfig};
use super::ImportError;

/// Canal de notification des runs
pub const PROGRESS_CHANNEL: &str = "import_progress";

const SUBMIT_SQL: &str = "SELECT import_geo_features($1::jsonb)";

const FETCH_SQL: &str = "\
SELECT row_to_json(r) FROM (
    SELECT id, status, total_features, imported_count, failed_count,
           collection_id::text AS collection_id, layer_id::text AS layer_id, metadata
    FROM import_runs
    WHERE id::text = $1
) r";

/// Endpoint d'import via la fonction stockée
#[derive(Clone)]
pub struct PgImportEndpoint {
    pool: Pool,
}

impl PgImportEndpoint {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportEndpoint for PgImportEndpoint {
    async fn submit(&self, request: &ImportRequest) -> Result<ImportResponse, ImportError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| ImportError::Endpoint(format!("Failed to encode request: {}", e)))?;
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| ImportError::Unreachable(format!("Failed to get connection from pool: {}", e)))?;

        debug!(
            collection = %request.collection_name,
            features = request.len(),
            batch_size = request.batch_size,
            "Submitting import"
        );
        // Une erreur ici peut survenir après exécution : jamais relancée
        let row = client
            .query_one(SUBMIT_SQL, &[&payload])
            .await
            .map_err(|e| ImportError::Endpoint(e.to_string()))?;
        let response: Value = row
            .try_get(0)
            .map_err(|e| ImportError::Endpoint(format!("Unexpected response column: {}", e)))?;
        serde_json::from_value(response)
            .map_err(|e| ImportError::Endpoint(format!("Invalid import response: {}", e)))
    }
}

/// Suivi par LISTEN/NOTIFY et lecture de `import_runs`
#[derive(Clone)]
pub struct PgProgressFeed {
    pool: Pool,
    database: DatabaseConfig,
}

impl PgProgressFeed {
    pub fn new(pool: Pool, database: DatabaseConfig) -> Self {
        Self { pool, database }
    }
}

#[async_trait]
impl ProgressFeed for PgProgressFeed {
    async fn subscribe(&self, run_id: &str) -> Result<ProgressStream, ImportError> {
        let (client, messages) = connect_listener(&self.database)
            .await
            .map_err(|e| ImportError::Feed(format!("{:#}", e)))?;
        client
            .batch_execute(&format!("LISTEN {}", PROGRESS_CHANNEL))
            .await
            .map_err(|e| ImportError::Feed(format!("LISTEN failed: {}", e)))?;
        debug!(run_id, channel = PROGRESS_CHANNEL, "Listening for progress");

        let run_id = run_id.to_string();
        let updates = messages.filter_map(move |message| {
            let update = match message {
                AsyncMessage::Notification(notification) if notification.channel() == PROGRESS_CHANNEL => {
                    parse_notification(notification.payload(), &run_id)
                }
                AsyncMessage::Notice(notice) => {
                    debug!(notice = %notice, "Server notice");
                    None
                }
                _ => None,
            };
            futures::future::ready(update.map(Ok))
        });

        // le client doit vivre aussi longtemps que le flux
        let stream = stream::unfold((client, Box::pin(updates)), |(client, mut updates)| async move {
            let row = updates.next().await?;
            Some((row, (client, updates)))
        });
        Ok(stream.boxed())
    }

    async fn fetch(&self, run_id: &str) -> Result<Option<ProgressRow>, ImportError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| ImportError::Feed(format!("Failed to get connection from pool: {}", e)))?;
        let row = client
            .query_opt(FETCH_SQL, &[&run_id])
            .await
            .map_err(|e| ImportError::Feed(e.to_string()))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let value: Value = row.try_get(0).map_err(|e| ImportError::Feed(e.to_string()))?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ImportError::Feed(format!("Invalid run row: {}", e)))
    }
}

/// Décode une notification ; `None` si elle concerne un autre run ou est illisible
fn parse_notification(payload: &str, run_id: &str) -> Option<ProgressRow> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable progress notification");
            return None;
        }
    };
    let matches = match value.get("id") {
        Some(Value::String(id)) => id == run_id,
        Some(id) => id.to_string() == run_id,
        None => false,
    };
    if !matches {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(row) => Some(row),
        Err(e) => {
            warn!(run_id, error = %e, "Ignoring malformed progress notification");
            None
        }
    }
}
