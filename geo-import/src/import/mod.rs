//! Import par lots vers un endpoint transactionnel externe
//!
//! L'orchestrateur soumet les features sélectionnées du dataset complet,
//! suit l'avancement par notifications (repli en polling) et agrège les
//! échecs par feature.

pub mod endpoint;
pub mod feed;
pub mod orchestrator;
pub mod pool;
pub mod postgres;
pub mod state;

pub use endpoint::{FeatureError, ImportEndpoint, ImportRequest, ImportResponse};
pub use feed::{ProgressFeed, ProgressRow, ProgressStream, RunMetadata, RunStatus};
pub use orchestrator::{ImportJob, ImportOrchestrator, ImportOutcome, OrchestratorConfig};
pub use pool::{create_pool, test_connection, DatabaseConfig, SslMode};
pub use postgres::{PgImportEndpoint, PgProgressFeed, PROGRESS_CHANNEL};
pub use state::{ImportBatchState, OrchestratorPhase};

use thiserror::Error;

/// Erreurs de transport et d'exécution d'un import
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportError {
    #[error("Import endpoint error: {0}")]
    Endpoint(String),

    /// Endpoint injoignable avant exécution de la requête (relançable)
    #[error("Import endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Progress feed error: {0}")]
    Feed(String),

    #[error("Import timed out after {elapsed_secs}s ({imported} imported, {failed} failed of {total})")]
    Timeout {
        elapsed_secs: u64,
        imported: usize,
        failed: usize,
        total: usize,
    },

    #[error("Import run failed: {message} ({imported} imported, {failed} failed of {total})")]
    RunFailed {
        message: String,
        imported: usize,
        failed: usize,
        total: usize,
    },

    #[error("Source SRID unknown: pass it explicitly to import this dataset")]
    SourceSridRequired,

    #[error("Nothing selected for import")]
    EmptySelection,
}

impl ImportError {
    /// Indique une erreur de transport que l'on peut retenter
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Compteurs partiels portés par l'erreur (importés, échoués)
    pub fn partial_counts(&self) -> Option<(usize, usize)> {
        match self {
            Self::Timeout { imported, failed, .. } | Self::RunFailed { imported, failed, .. } => {
                Some((*imported, *failed))
            }
            _ => None,
        }
    }
}
