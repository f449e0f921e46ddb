//! Orchestrateur d'import : soumission puis suivi jusqu'à un état terminal
//!
//! `Idle → Submitting → {StreamingProgress | PollingProgress} → Completed | Failed`
//!
//! Le suivi préfère les notifications poussées. Si l'abonnement échoue ou
//! que le flux se termine avant un statut terminal, la ligne du run est lue
//! périodiquement (1 s sans notifications, 5 s en sécurité quand elles sont
//! actives) et l'abonnement est retenté. Les échecs de lecture consécutifs
//! déclenchent une attente exponentielle plafonnée, comme les soumissions
//! refusées faute de connexion. Le plafond de durée couvre la soumission
//! elle-même.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use geo_loader::streaming::Backoff;
use geo_loader::CanonicalFeature;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::endpoint::{ImportEndpoint, ImportRequest, ImportResponse};
use super::feed::{ProgressFeed, ProgressRow, ProgressStream, RunStatus};
use super::state::{ImportBatchState, OrchestratorPhase};
use super::ImportError;
use crate::report::ImportReport;

/// Réglages de l'orchestrateur
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Taille de lot transmise à l'endpoint
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub connected_poll_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_consecutive_failures: u32,
    /// Plafond de durée d'un import
    pub timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            poll_interval: Duration::from_secs(1),
            connected_poll_interval: Duration::from_secs(5),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            max_consecutive_failures: 8,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl OrchestratorConfig {
    fn backoff(&self) -> Backoff {
        Backoff {
            base: self.backoff_base,
            factor: 2,
            cap: self.backoff_cap,
            max_attempts: self.max_consecutive_failures,
        }
    }
}

/// Travail d'import : features du dataset complet, non transformées
#[derive(Debug, Clone)]
pub struct ImportJob<'a> {
    pub project_file_id: String,
    pub collection_name: String,
    pub features: Vec<&'a CanonicalFeature>,
    /// SRID des coordonnées transmises
    pub source_srid: Option<u32>,
    pub target_srid: u32,
}

/// Résultat d'un import terminé
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub state: ImportBatchState,
    pub report: ImportReport,
}

enum Event {
    Row(ProgressRow),
    Disconnected(Option<ImportError>),
    PollDue,
}

pub struct ImportOrchestrator {
    endpoint: Arc<dyn ImportEndpoint>,
    feed: Arc<dyn ProgressFeed>,
    config: OrchestratorConfig,
    state: watch::Sender<ImportBatchState>,
}

impl ImportOrchestrator {
    pub fn new(endpoint: Arc<dyn ImportEndpoint>, feed: Arc<dyn ProgressFeed>, config: OrchestratorConfig) -> Self {
        let (state, _) = watch::channel(ImportBatchState::default());
        Self {
            endpoint,
            feed,
            config,
            state,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Observe l'état (phase et compteurs) de l'import en cours
    pub fn subscribe(&self) -> watch::Receiver<ImportBatchState> {
        self.state.subscribe()
    }

    pub fn phase(&self) -> OrchestratorPhase {
        self.state.borrow().phase
    }

    /// Dernier état publié
    pub fn state(&self) -> ImportBatchState {
        self.state.borrow().clone()
    }

    fn publish(&self, state: &ImportBatchState) {
        self.state.send_replace(state.clone());
    }

    fn set_phase(&self, state: &mut ImportBatchState, phase: OrchestratorPhase) {
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "Import phase changed");
            state.phase = phase;
        }
        self.publish(state);
    }

    /// Soumet le travail et suit le run jusqu'à son état terminal
    ///
    /// Aucune déduplication : soumettre deux fois le même travail crée deux runs.
    pub async fn run(&self, job: ImportJob<'_>) -> Result<ImportOutcome, ImportError> {
        let started = Instant::now();
        let mut state = ImportBatchState::new(job.features.len());
        let result = self.execute(&job, &mut state, started, started + self.config.timeout).await;
        let elapsed = started.elapsed();

        let mut report = ImportReport::new(&job.collection_name);
        report.source_srid = job.source_srid;
        report.target_srid = Some(job.target_srid);
        report.record_state(&state);
        report.set_duration(elapsed);

        match result {
            Ok(()) => {
                self.set_phase(&mut state, OrchestratorPhase::Completed);
                report.finalize();
                info!(
                    collection = %job.collection_name,
                    imported = state.imported,
                    failed = state.failed,
                    duration_ms = elapsed.as_millis() as u64,
                    "Import completed"
                );
                Ok(ImportOutcome { state, report })
            }
            Err(e) => {
                state.failure.get_or_insert_with(|| e.to_string());
                self.set_phase(&mut state, OrchestratorPhase::Failed);
                warn!(
                    collection = %job.collection_name,
                    imported = state.imported,
                    failed = state.failed,
                    error = %e,
                    "Import failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &ImportJob<'_>,
        state: &mut ImportBatchState,
        started: Instant,
        deadline: Instant,
    ) -> Result<(), ImportError> {
        let source_srid = job.source_srid.ok_or(ImportError::SourceSridRequired)?;
        if job.features.is_empty() {
            return Err(ImportError::EmptySelection);
        }

        self.set_phase(state, OrchestratorPhase::Submitting);
        let request = ImportRequest::new(
            job.project_file_id.clone(),
            job.collection_name.clone(),
            job.features.iter().copied(),
            source_srid,
            job.target_srid,
            self.config.batch_size,
        );
        let response = self.submit(&request, state, started, deadline).await?;
        state.apply_response(&response);
        info!(
            run_id = %response.import_id,
            total = state.total,
            imported = state.imported,
            failed = state.failed,
            "Import submitted"
        );

        if state.is_complete() {
            return Ok(());
        }
        self.track(&response.import_id, state, started, deadline).await
    }

    /// Soumission bornée par l'échéance, relancée tant que l'endpoint est injoignable
    async fn submit(
        &self,
        request: &ImportRequest,
        state: &ImportBatchState,
        started: Instant,
        deadline: Instant,
    ) -> Result<ImportResponse, ImportError> {
        let backoff = self.config.backoff();
        let mut failures: u32 = 0;
        loop {
            if Instant::now() >= deadline {
                return Err(self.timeout(state, started));
            }
            match timeout_at(deadline, self.endpoint.submit(request)).await {
                Err(_) => return Err(self.timeout(state, started)),
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if e.is_transient() => {
                    failures += 1;
                    if !backoff.allows(failures) {
                        return Err(ImportError::Unreachable(format!(
                            "{} consecutive submit failures, last: {}",
                            failures, e
                        )));
                    }
                    let delay = backoff.delay(failures - 1);
                    warn!(failures, delay_ms = delay.as_millis() as u64, error = %e, "Import submission failed, retrying");
                    sleep_until((Instant::now() + delay).min(deadline)).await;
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    async fn connect(&self, run_id: &str, deadline: Instant) -> Option<ProgressStream> {
        match timeout_at(deadline, self.feed.subscribe(run_id)).await {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                debug!(run_id, error = %e, "Progress subscription unavailable");
                None
            }
            Err(_) => None,
        }
    }

    /// Applique une ligne de suivi ; `true` quand le run est terminé avec succès
    fn apply(&self, state: &mut ImportBatchState, row: &ProgressRow) -> Result<bool, ImportError> {
        state.apply_row(row);
        self.publish(state);
        debug!(
            status = ?row.status,
            imported = state.imported,
            failed = state.failed,
            total = state.total,
            "Import progress"
        );

        match row.status {
            RunStatus::Failed => Err(ImportError::RunFailed {
                message: row
                    .metadata
                    .error
                    .clone()
                    .unwrap_or_else(|| "run reported failure".to_string()),
                imported: state.imported,
                failed: state.failed,
                total: state.total,
            }),
            RunStatus::Completed => {
                if !state.is_complete() {
                    warn!(
                        processed = state.processed(),
                        total = state.total,
                        "Run completed with fewer results than submitted features"
                    );
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn timeout(&self, state: &ImportBatchState, started: Instant) -> ImportError {
        ImportError::Timeout {
            elapsed_secs: started.elapsed().as_secs(),
            imported: state.imported,
            failed: state.failed,
            total: state.total,
        }
    }

    async fn track(
        &self,
        run_id: &str,
        state: &mut ImportBatchState,
        started: Instant,
        deadline: Instant,
    ) -> Result<(), ImportError> {
        let backoff = self.config.backoff();
        let mut failures: u32 = 0;
        let mut stream = self.connect(run_id, deadline).await;
        if stream.is_none() {
            warn!(run_id, "Progress notifications unavailable, polling");
        }

        loop {
            if Instant::now() >= deadline {
                return Err(self.timeout(state, started));
            }
            let phase = if stream.is_some() {
                OrchestratorPhase::StreamingProgress
            } else {
                OrchestratorPhase::PollingProgress
            };
            self.set_phase(state, phase);

            let wait = if failures > 0 {
                backoff.delay(failures - 1)
            } else if stream.is_some() {
                self.config.connected_poll_interval
            } else {
                self.config.poll_interval
            };
            let tick = (Instant::now() + wait).min(deadline);

            let event = match stream.as_mut() {
                Some(updates) => tokio::select! {
                    update = updates.next() => match update {
                        Some(Ok(row)) => Event::Row(row),
                        Some(Err(e)) => Event::Disconnected(Some(e)),
                        None => Event::Disconnected(None),
                    },
                    _ = sleep_until(tick) => Event::PollDue,
                },
                None => {
                    sleep_until(tick).await;
                    Event::PollDue
                }
            };

            match event {
                Event::Row(row) => {
                    if self.apply(state, &row)? {
                        return Ok(());
                    }
                }
                Event::Disconnected(error) => {
                    match error {
                        Some(e) => warn!(run_id, error = %e, "Progress stream failed, falling back to polling"),
                        None => warn!(run_id, "Progress stream closed, falling back to polling"),
                    }
                    stream = None;
                }
                Event::PollDue => {
                    if Instant::now() >= deadline {
                        return Err(self.timeout(state, started));
                    }
                    match timeout_at(deadline, self.feed.fetch(run_id)).await {
                        Err(_) => return Err(self.timeout(state, started)),
                        Ok(Ok(row)) => {
                            failures = 0;
                            if let Some(row) = row {
                                if self.apply(state, &row)? {
                                    return Ok(());
                                }
                            }
                        }
                        Ok(Err(e)) => {
                            failures += 1;
                            warn!(run_id, failures, error = %e, "Progress poll failed");
                            if !backoff.allows(failures) {
                                return Err(ImportError::Feed(format!(
                                    "{} consecutive poll failures, last: {}",
                                    failures, e
                                )));
                            }
                        }
                    }
                    if stream.is_none() {
                        stream = self.connect(run_id, deadline).await;
                        if stream.is_some() {
                            info!(run_id, "Progress notifications re-established");
                        }
                    }
                }
            }
        }
    }
}
