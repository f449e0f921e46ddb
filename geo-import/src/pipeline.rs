//! Chaîne fichier → dataset → aperçu, partagée par les commandes
//!
//! Le service de chargement porte le budget mémoire de la configuration,
//! suivi par un moniteur qui publie la pression vers les parsers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use geo_loader::registry::{extension_of, is_companion_extension, lookup};
use geo_loader::streaming::MonitorConfig;
use geo_loader::{
    CompanionFileSet, Dataset, FileRef, Loader, MemoryMonitor, ParseOptions, ProgressEvent, ProgressSink,
};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::preview::{PreviewManager, PreviewOptions};

pub struct Pipeline {
    config: PipelineConfig,
    options: ParseOptions,
    loader: Loader,
    monitor: MemoryMonitor,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let options = config.parse_options();
        let loader = match options.memory.clone() {
            Some(budget) => Loader::new().with_budget(budget),
            None => Loader::new(),
        };
        let mut monitor = MemoryMonitor::new(MonitorConfig::default());
        loader.attach_monitor(&mut monitor);
        Self {
            config,
            options,
            loader,
            monitor,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Démarre le moniteur mémoire (runtime tokio requis)
    pub fn start_monitor(&mut self) {
        self.monitor.start();
    }

    /// Lit les chemins (fichiers ou répertoires) et les regroupe en ensembles
    pub fn resolve(&self, paths: &[PathBuf]) -> Result<Vec<CompanionFileSet>> {
        let files = collect_inputs(paths)?;
        let sets = self.loader.resolve(&files)?;
        info!(files = files.len(), sets = sets.len(), "Inputs resolved");
        Ok(sets)
    }

    /// Parse un ensemble en SRID source, avec journalisation de la progression
    pub async fn parse(&self, set: CompanionFileSet, source_srid: Option<u32>) -> Result<Dataset> {
        let mut options = self.options.clone();
        options.source_srid = source_srid;

        let sink = Arc::new(ProgressSink::new());
        let mut events = sink.subscribe();
        let name = set.main.name.clone();
        let logger = tokio::spawn(async move {
            let mut reported = 0.0;
            while let Some(event) = events.recv().await {
                match event {
                    ProgressEvent::Started { file, total_bytes } => {
                        debug!(file = %file, total_bytes, "Parsing started");
                    }
                    ProgressEvent::Chunk {
                        total_features, progress, ..
                    } => {
                        if progress - reported >= 0.1 {
                            reported = progress;
                            info!(features = total_features, "Parsing {:.0}%", progress * 100.0);
                        }
                    }
                    ProgressEvent::Finished { features, success, .. } => {
                        debug!(features, success, "Parsing finished");
                        break;
                    }
                }
            }
        });

        let result = self.loader.parse(set, options, sink).await;
        if let Err(e) = logger.await {
            warn!(error = %e, "Progress logger failed");
        }
        let dataset = result.with_context(|| format!("Failed to parse {}", name))?;
        if dataset.stats.issue_count() > 0 {
            warn!(file = %name, issues = dataset.stats.issue_count(), "Parsed with non-fatal issues");
        }
        Ok(dataset)
    }

    /// Aperçu avec les réglages de la configuration
    pub fn preview(&self, dataset: Arc<Dataset>, overrides: PreviewOverrides) -> Result<PreviewManager> {
        let mut options = self.config.preview_options();
        overrides.apply(&mut options);
        Ok(PreviewManager::new(dataset, options)?)
    }
}

/// Réglages d'aperçu passés en ligne de commande
#[derive(Debug, Clone, Default)]
pub struct PreviewOverrides {
    pub max_features: Option<usize>,
    pub target_srid: Option<u32>,
    pub sample: bool,
}

impl PreviewOverrides {
    fn apply(&self, options: &mut PreviewOptions) {
        if let Some(max) = self.max_features {
            options.max_features = max;
        }
        if self.target_srid.is_some() {
            options.target_srid = self.target_srid;
        }
        if self.sample {
            options.sampling = crate::preview::Sampling::Sample;
        }
    }
}

/// Charge les fichiers ; un répertoire fournit ses fichiers de format connu
pub fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<FileRef>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory: {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_known_file(p))
                .collect();
            entries.sort();
            for entry in entries {
                files.push(read_file(&entry)?);
            }
        } else {
            files.push(read_file(path)?);
        }
    }
    if files.is_empty() {
        anyhow::bail!("No input files found");
    }
    Ok(files)
}

fn read_file(path: &Path) -> Result<FileRef> {
    FileRef::from_path(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

fn is_known_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    extension_of(&name).is_some_and(|ext| lookup(&ext).is_some() || is_companion_extension(&ext))
}

/// Identifiants de features : `"0,4,10-12"`
pub fn parse_selection(spec: &str) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u64 = start.trim().parse().with_context(|| format!("Invalid id range: {}", part))?;
                let end: u64 = end.trim().parse().with_context(|| format!("Invalid id range: {}", part))?;
                if end < start {
                    anyhow::bail!("Invalid id range: {}", part);
                }
                ids.extend(start..=end);
            }
            None => ids.push(part.parse().with_context(|| format!("Invalid feature id: {}", part))?),
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("0, 4,10-12").unwrap(), vec![0, 4, 10, 11, 12]);
        assert!(parse_selection("").unwrap().is_empty());
        assert!(parse_selection("5-2").is_err());
        assert!(parse_selection("a").is_err());
    }

    #[test]
    fn test_collect_inputs_filters_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("points.csv"), "x,y\n1,2\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("zones.prj"), "PROJCS[\"CH1903+ / LV95\"]").unwrap();

        let files = collect_inputs(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["points.csv", "zones.prj"]);
    }

    #[test]
    fn test_collect_inputs_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_inputs(&[dir.path().to_path_buf()]).is_err());
    }

    #[tokio::test]
    async fn test_parse_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = String::from("E;N;name\n");
        for i in 0..20 {
            csv.push_str(&format!("{};{};tree{}\n", 2_600_000 + i * 10, 1_200_000 + i * 10, i));
        }
        let path = dir.path().join("trees.csv");
        std::fs::write(&path, csv).unwrap();

        let pipeline = Pipeline::new(PipelineConfig::default());
        let mut sets = pipeline.resolve(&[path]).unwrap();
        assert_eq!(sets.len(), 1);
        let dataset = pipeline.parse(sets.remove(0), None).await.unwrap();
        assert_eq!(dataset.len(), 20);
        assert_eq!(dataset.metadata.source_srid, Some(2056));

        let overrides = PreviewOverrides {
            max_features: Some(5),
            ..PreviewOverrides::default()
        };
        let preview = pipeline.preview(Arc::new(dataset), overrides).unwrap();
        assert_eq!(preview.preview().len(), 5);
        assert_eq!(preview.full().len(), 20);
    }
}
