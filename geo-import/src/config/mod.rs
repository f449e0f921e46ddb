//! Configuration du pipeline (fichier JSON ou preset embarqué)

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use geo_loader::streaming::DEFAULT_TEXT_CHUNK_SIZE;
use geo_loader::{MemoryBudget, ParseOptions};
use serde::{Deserialize, Serialize};

use crate::import::OrchestratorConfig;
use crate::preview::{PreviewOptions, Sampling};

/// Configuration principale
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Budget mémoire partagé par les parsings (Mo)
    pub memory_budget_mb: usize,

    /// Taille cible d'un chunk (octets)
    pub chunk_size: usize,

    /// SRID cible de l'aperçu et de l'import
    pub target_srid: Option<u32>,

    pub preview: PreviewSettings,

    pub import: ImportSettings,
}

/// Réglages de l'aperçu
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreviewSettings {
    pub max_features: usize,
    /// Tolérance de simplification, en unités du SRID cible
    pub simplify_tolerance: Option<f64>,
    pub sampling: Sampling,
}

/// Réglages de l'import par lots
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportSettings {
    pub batch_size: usize,
    /// Intervalle de polling sans notification
    pub poll_interval_ms: u64,
    /// Intervalle de polling de sécurité avec notifications actives
    pub connected_poll_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub max_consecutive_failures: u32,
    /// Plafond de durée d'un import
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: 256,
            chunk_size: DEFAULT_TEXT_CHUNK_SIZE,
            target_srid: None,
            preview: PreviewSettings::default(),
            import: ImportSettings::default(),
        }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        let options = PreviewOptions::default();
        Self {
            max_features: options.max_features,
            simplify_tolerance: options.simplify_tolerance,
            sampling: options.sampling,
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        let config = OrchestratorConfig::default();
        Self {
            batch_size: config.batch_size,
            poll_interval_ms: millis(config.poll_interval),
            connected_poll_interval_ms: millis(config.connected_poll_interval),
            backoff_base_ms: millis(config.backoff_base),
            backoff_cap_ms: millis(config.backoff_cap),
            max_consecutive_failures: config.max_consecutive_failures,
            timeout_secs: config.timeout.as_secs(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PipelineConfig {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "default" => Self::load_embedded(include_str!("presets/default.json")),
            "low-memory" => Self::load_embedded(include_str!("presets/low-memory.json")),
            _ => anyhow::bail!("Unknown preset: {}. Use: default, low-memory", preset),
        }
    }

    /// Preset si le nom est connu, sinon chemin de fichier
    pub fn resolve(spec: &str) -> Result<Self> {
        let path = Path::new(spec);
        if path.extension().is_some_and(|ext| ext == "json") || path.exists() {
            Self::load(path)
        } else {
            Self::from_preset(spec)
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse embedded config")
    }

    /// Options de parsing (sans reprojection : le dataset complet reste en SRID source)
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            chunk_size: self.chunk_size.max(1),
            memory: Some(MemoryBudget::new(self.memory_budget_mb.saturating_mul(1024 * 1024))),
            ..ParseOptions::default()
        }
    }

    pub fn preview_options(&self) -> PreviewOptions {
        PreviewOptions {
            max_features: self.preview.max_features,
            simplify_tolerance: self.preview.simplify_tolerance.filter(|t| *t > 0.0),
            sampling: self.preview.sampling,
            target_srid: self.target_srid,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let import = &self.import;
        OrchestratorConfig {
            batch_size: import.batch_size.max(1),
            poll_interval: Duration::from_millis(import.poll_interval_ms),
            connected_poll_interval: Duration::from_millis(import.connected_poll_interval_ms),
            backoff_base: Duration::from_millis(import.backoff_base_ms),
            backoff_cap: Duration::from_millis(import.backoff_cap_ms),
            max_consecutive_failures: import.max_consecutive_failures.max(1),
            timeout: Duration::from_secs(import.timeout_secs),
        }
    }
}
