//! Service de chargement : résolution, aperçu structurel et parsing
//!
//! Le service porte le budget mémoire partagé, la jauge de pression
//! publiée par le moniteur et la garde « en cours » qui refuse un second
//! parsing simultané du même fichier.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::companion::{self, CompanionFileSet, FileRef};
use crate::error::{LoaderError, Result};
use crate::parsers::{FormatParser, ParseOptions, Parser};
use crate::streaming::{MemoryBudget, MemoryMonitor, PressureGate, ProgressSink};
use crate::types::{Dataset, StructuralSummary};

/// Garde retirant le fichier de l'ensemble « en cours » à sa destruction
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

/// Point d'entrée des parsers
#[derive(Debug, Clone, Default)]
pub struct Loader {
    in_flight: Arc<Mutex<HashSet<String>>>,
    budget: Option<MemoryBudget>,
    pressure: PressureGate,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Budget mémoire appliqué aux parsings sans budget explicite
    pub fn with_budget(mut self, budget: MemoryBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn budget(&self) -> Option<&MemoryBudget> {
        self.budget.as_ref()
    }

    /// Branche le service sur un moniteur mémoire
    ///
    /// Le budget du service est suivi par le moniteur et la pression
    /// publiée suspend la validation optionnelle des géométries.
    pub fn attach_monitor(&self, monitor: &mut MemoryMonitor) {
        if let Some(budget) = &self.budget {
            monitor.register_budget(budget.clone());
        }
        monitor.add_listener(Arc::new(self.pressure.clone()));
    }

    pub fn pressure(&self) -> &PressureGate {
        &self.pressure
    }

    /// Regroupe les fichiers en ensembles principal + compagnons
    pub fn resolve(&self, files: &[FileRef]) -> Result<Vec<CompanionFileSet>> {
        companion::resolve(files)
    }

    /// Aperçu structurel borné
    pub fn analyze(&self, files: &CompanionFileSet) -> Result<StructuralSummary> {
        let summary = Parser::for_files(files).analyze(files)?;
        debug!(
            file = %files.main.name,
            layers = summary.layers.len(),
            sample = summary.sample.len(),
            srid = ?summary.detected_srid,
            "File analyzed"
        );
        Ok(summary)
    }

    /// Indique si un parsing du fichier est en cours
    pub fn is_in_flight(&self, file: &str) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(file)
    }

    fn acquire(&self, file: &str) -> Result<InFlight> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(file.to_string()) {
            return Err(LoaderError::ParseInFlight(file.to_string()));
        }
        Ok(InFlight {
            set: Arc::clone(&self.in_flight),
            key: file.to_string(),
        })
    }

    fn effective_options(&self, options: &ParseOptions) -> ParseOptions {
        let mut options = options.clone();
        if options.memory.is_none() {
            options.memory = self.budget.clone();
        }
        options.pressure = self.pressure.clone();
        options
    }

    /// Parsing synchrone (thread courant)
    pub fn parse_blocking(
        &self,
        files: &CompanionFileSet,
        options: &ParseOptions,
        sink: &ProgressSink,
    ) -> Result<Dataset> {
        let _guard = self.acquire(&files.main.name)?;
        let options = self.effective_options(options);
        let dataset = Parser::for_files(files).parse(files, &options, sink)?;
        info!(
            file = %files.main.name,
            features = dataset.len(),
            issues = dataset.stats.issue_count(),
            srid = ?dataset.metadata.source_srid,
            "File parsed"
        );
        Ok(dataset)
    }

    /// Parsing sur le pool bloquant de tokio
    ///
    /// La garde est prise avant le lancement : un second appel sur le même
    /// fichier échoue immédiatement avec `ParseInFlight`.
    pub async fn parse(
        &self,
        files: CompanionFileSet,
        options: ParseOptions,
        sink: Arc<ProgressSink>,
    ) -> Result<Dataset> {
        let guard = self.acquire(&files.main.name)?;
        let options = self.effective_options(&options);
        let name = files.main.name.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            Parser::for_files(&files).parse(&files, &options, &sink)
        });
        let dataset = handle
            .await
            .map_err(|e| LoaderError::parse_error(&name, format!("parse task failed: {}", e)))??;
        info!(
            file = %name,
            features = dataset.len(),
            issues = dataset.stats.issue_count(),
            srid = ?dataset.metadata.source_srid,
            "File parsed"
        );
        Ok(dataset)
    }
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight").field("key", &self.key).finish()
    }
}
