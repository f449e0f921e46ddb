//! État observable d'un import

use serde::Serialize;

use super::endpoint::{FeatureError, ImportResponse};
use super::feed::ProgressRow;

/// Phase de l'orchestrateur
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrchestratorPhase {
    #[default]
    Idle,
    Submitting,
    /// Notifications poussées actives
    StreamingProgress,
    /// Notifications indisponibles, lecture périodique
    PollingProgress,
    Completed,
    Failed,
}

impl OrchestratorPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Avancement d'un run d'import
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatchState {
    pub phase: OrchestratorPhase,
    pub run_id: Option<String>,
    pub total: usize,
    pub imported: usize,
    pub failed: usize,
    pub collection_id: Option<String>,
    pub layer_id: Option<String>,
    /// Échecs par feature, dans l'ordre de réception
    pub errors: Vec<FeatureError>,
    /// Message d'échec du run
    pub failure: Option<String>,
}

impl ImportBatchState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.imported + self.failed
    }

    /// Toutes les features ont un résultat
    pub fn is_complete(&self) -> bool {
        self.processed() >= self.total
    }

    /// Fraction traitée dans [0, 1]
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.processed() as f64 / self.total as f64).min(1.0)
    }

    /// Intègre la réponse de soumission
    pub fn apply_response(&mut self, response: &ImportResponse) {
        self.run_id = Some(response.import_id.clone());
        self.imported = response.imported_count;
        self.failed = response.failed_count;
        self.collection_id = response.collection_id.clone();
        self.layer_id = response.layer_id.clone();
        self.errors.extend(response.per_feature_errors.iter().cloned());
    }

    /// Intègre une ligne de suivi (les compteurs ne reculent jamais)
    pub fn apply_row(&mut self, row: &ProgressRow) {
        self.imported = self.imported.max(row.imported_count);
        self.failed = self.failed.max(row.failed_count);
        if row.total_features > 0 {
            self.total = row.total_features;
        }
        if row.collection_id.is_some() {
            self.collection_id = row.collection_id.clone();
        }
        if row.layer_id.is_some() {
            self.layer_id = row.layer_id.clone();
        }
        if let Some(error) = &row.metadata.error {
            self.failure = Some(error.clone());
        }
    }
}
