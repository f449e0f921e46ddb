//! Contrat de l'endpoint d'import

use async_trait::async_trait;
use geo_loader::CanonicalFeature;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ImportError;

/// Requête d'import (features non transformées, en SRID source)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub project_file_id: String,
    pub collection_name: String,
    pub features: Vec<geojson::Feature>,
    pub source_srid: u32,
    pub target_srid: u32,
    pub batch_size: usize,
}

impl ImportRequest {
    pub fn new<'a>(
        project_file_id: impl Into<String>,
        collection_name: impl Into<String>,
        features: impl IntoIterator<Item = &'a CanonicalFeature>,
        source_srid: u32,
        target_srid: u32,
        batch_size: usize,
    ) -> Self {
        Self {
            project_file_id: project_file_id.into(),
            collection_name: collection_name.into(),
            features: features.into_iter().map(CanonicalFeature::to_geojson).collect(),
            source_srid,
            target_srid,
            batch_size,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Échec d'une feature côté serveur
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureError {
    #[serde(default)]
    pub feature_id: Option<Value>,
    pub message: String,
}

/// Réponse de l'endpoint
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    /// Identifiant du run, clé du suivi de progression
    pub import_id: String,
    #[serde(default)]
    pub imported_count: usize,
    #[serde(default)]
    pub failed_count: usize,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub per_feature_errors: Vec<FeatureError>,
}

/// Endpoint transactionnel d'import par lots
#[async_trait]
pub trait ImportEndpoint: Send + Sync {
    async fn submit(&self, request: &ImportRequest) -> Result<ImportResponse, ImportError>;
}
