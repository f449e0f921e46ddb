//! Suivi de progression d'un run d'import

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Deserializer, Serialize};

use super::ImportError;

/// Statut d'un run côté serveur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub error: Option<String>,
}

/// Ligne de suivi d'un run
///
/// Accepte aussi les noms de colonnes bruts (`row_to_json` sur `import_runs`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRow {
    pub status: RunStatus,
    #[serde(default, alias = "total_features")]
    pub total_features: usize,
    #[serde(default, alias = "imported_count")]
    pub imported_count: usize,
    #[serde(default, alias = "failed_count")]
    pub failed_count: usize,
    #[serde(default, alias = "collection_id")]
    pub collection_id: Option<String>,
    #[serde(default, alias = "layer_id")]
    pub layer_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: RunMetadata,
}

/// `row_to_json` écrit `null` pour une colonne jsonb vide
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Flux de mises à jour poussées par le serveur
pub type ProgressStream = BoxStream<'static, Result<ProgressRow, ImportError>>;

/// Source de progression : notifications poussées et lecture ponctuelle
#[async_trait]
pub trait ProgressFeed: Send + Sync {
    /// Abonnement aux mises à jour du run
    async fn subscribe(&self, run_id: &str) -> Result<ProgressStream, ImportError>;

    /// Lecture de la ligne du run (`None` tant qu'elle n'est pas visible)
    async fn fetch(&self, run_id: &str) -> Result<Option<ProgressRow>, ImportError>;
}
