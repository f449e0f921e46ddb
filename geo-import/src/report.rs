//! Rapport d'import avec graceful degradation
//!
//! Agrège le résultat du parsing (erreurs non fatales par catégorie) et celui
//! de l'import (compteurs, échecs par feature, échec global).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use geo_loader::{Dataset, ProcessingIssue};
use serde::Serialize;

use crate::import::{FeatureError, ImportBatchState, ImportError};

/// Statut global de l'import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportStatus {
    /// Toutes les features importées
    Success,
    /// Import terminé avec des features en échec
    PartialSuccess,
    Failed,
    /// Plafond de durée atteint avant l'état terminal
    TimedOut,
}

/// Rapport complet d'import
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// Fichier principal importé
    pub source: String,
    pub collection: String,
    pub duration_secs: f64,
    pub status: ImportStatus,
    pub source_srid: Option<u32>,
    pub target_srid: Option<u32>,

    // Parsing
    pub features_parsed: usize,
    pub parse_issues: BTreeMap<String, usize>,
    pub parse_errors: Vec<ProcessingIssue>,

    // Import
    pub features_selected: usize,
    pub features_imported: usize,
    pub features_failed: usize,
    pub run_id: Option<String>,
    pub collection_id: Option<String>,
    pub layer_id: Option<String>,
    pub errors: Vec<FeatureError>,
    pub failure: Option<String>,

    #[serde(skip)]
    timed_out: bool,
}

impl ImportReport {
    pub fn new(collection: &str) -> Self {
        Self {
            source: String::new(),
            collection: collection.to_string(),
            duration_secs: 0.0,
            status: ImportStatus::Success,
            source_srid: None,
            target_srid: None,
            features_parsed: 0,
            parse_issues: BTreeMap::new(),
            parse_errors: Vec::new(),
            features_selected: 0,
            features_imported: 0,
            features_failed: 0,
            run_id: None,
            collection_id: None,
            layer_id: None,
            errors: Vec::new(),
            failure: None,
            timed_out: false,
        }
    }

    /// Enregistre le résultat du parsing
    pub fn record_parse(&mut self, source: &str, dataset: &Dataset) {
        self.source = source.to_string();
        self.features_parsed = dataset.len();
        if self.source_srid.is_none() {
            self.source_srid = dataset.metadata.source_srid;
        }
        self.parse_issues = dataset
            .stats
            .issue_counts
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), *count))
            .collect();
        self.parse_errors = dataset.stats.errors.clone();
    }

    /// Enregistre l'état observé de l'import
    pub fn record_state(&mut self, state: &ImportBatchState) {
        self.features_selected = state.total;
        self.features_imported = state.imported;
        self.features_failed = state.failed;
        self.run_id = state.run_id.clone();
        self.collection_id = state.collection_id.clone();
        self.layer_id = state.layer_id.clone();
        self.errors = state.errors.clone();
        if state.failure.is_some() {
            self.failure = state.failure.clone();
        }
    }

    /// Enregistre l'échec de l'import
    pub fn record_failure(&mut self, error: &ImportError) {
        if let Some((imported, failed)) = error.partial_counts() {
            self.features_imported = self.features_imported.max(imported);
            self.features_failed = self.features_failed.max(failed);
        }
        self.timed_out = matches!(error, ImportError::Timeout { .. });
        self.failure = Some(error.to_string());
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        let has_errors = self.features_failed > 0 || !self.errors.is_empty();
        self.status = if self.timed_out {
            ImportStatus::TimedOut
        } else if self.failure.is_some() && self.features_imported == 0 {
            ImportStatus::Failed
        } else if self.failure.is_some() {
            // run interrompu après des insertions
            ImportStatus::PartialSuccess
        } else if has_errors && self.features_imported > 0 {
            ImportStatus::PartialSuccess
        } else if has_errors {
            ImportStatus::Failed
        } else {
            ImportStatus::Success
        };
    }

    pub fn parse_issue_count(&self) -> usize {
        self.parse_issues.values().sum()
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("IMPORT REPORT - {} -> {}", self.source, self.collection);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);
        match (self.source_srid, self.target_srid) {
            (Some(src), Some(tgt)) => println!("SRID: EPSG:{} -> EPSG:{}", src, tgt),
            (Some(src), None) => println!("SRID: EPSG:{}", src),
            _ => println!("SRID: unknown"),
        }

        println!("\n--- PARSING ---");
        println!(
            "Features: {} parsed, {} issues",
            self.features_parsed,
            self.parse_issue_count()
        );
        for (kind, count) in &self.parse_issues {
            println!("  {}: {}", kind, count);
        }

        println!("\n--- IMPORT ---");
        println!(
            "Features: {} selected, {} imported, {} failed",
            self.features_selected, self.features_imported, self.features_failed
        );
        if let Some(run_id) = &self.run_id {
            println!("Run: {}", run_id);
        }
        if let (Some(collection), Some(layer)) = (&self.collection_id, &self.layer_id) {
            println!("Collection: {} / layer {}", collection, layer);
        }

        if !self.errors.is_empty() {
            println!("\n--- FEATURE ERRORS ({}) ---", self.errors.len());
            for e in self.errors.iter().take(20) {
                match &e.feature_id {
                    Some(id) => println!("  [{}] {}", id, e.message),
                    None => println!("  {}", e.message),
                }
            }
            if self.errors.len() > 20 {
                println!("  ... and {} more", self.errors.len() - 20);
            }
        }

        if let Some(failure) = &self.failure {
            println!("\nFailure: {}", failure);
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        format!(
            "{}: {} imported, {} failed of {} ({:?})",
            self.collection,
            self.features_imported,
            self.features_failed,
            self.features_selected,
            self.status
        )
    }
}
