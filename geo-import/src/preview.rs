//! Aperçu borné d'un dataset complet
//!
//! Le dataset complet n'est jamais modifié : l'aperçu est une copie
//! échantillonnée, éventuellement reprojetée puis simplifiée. La sélection
//! porte sur les identifiants du dataset complet et survit aux régénérations.

use std::collections::BTreeSet;
use std::sync::Arc;

use geo::{Geometry, LineString, MultiPolygon, Polygon, Simplify};
use geo_loader::{CanonicalFeature, Dataset, ProcessorStats};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::reproject::SmartReprojector;

/// Nombre de features de l'aperçu par défaut
pub const DEFAULT_PREVIEW_FEATURES: usize = 500;

/// Tolérance de simplification par défaut (unités du SRID cible)
pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 0.00001;

/// Choix des features quand le dataset dépasse le plafond
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sampling {
    /// Les premières features
    #[default]
    Truncate,
    /// Features réparties à pas constant sur tout le dataset
    Sample,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreviewOptions {
    pub max_features: usize,
    pub simplify_tolerance: Option<f64>,
    pub sampling: Sampling,
    /// Reprojection de la copie d'aperçu
    pub target_srid: Option<u32>,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_PREVIEW_FEATURES,
            simplify_tolerance: Some(DEFAULT_SIMPLIFY_TOLERANCE),
            sampling: Sampling::Truncate,
            target_srid: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Unknown feature ids: {0:?}")]
    UnknownFeatures(Vec<u64>),

    #[error("Preview reprojection failed: {0}")]
    Reprojection(#[source] anyhow::Error),
}

/// Identifiants sélectionnés dans le dataset complet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<u64>,
}

impl Selection {
    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identifiants, en ordre croissant
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }
}

/// Positions retenues pour l'aperçu
fn pick_indices(total: usize, max: usize, sampling: Sampling) -> Vec<usize> {
    if total <= max {
        return (0..total).collect();
    }
    match sampling {
        Sampling::Truncate => (0..max).collect(),
        Sampling::Sample => (0..max).map(|i| i * total / max).collect(),
    }
}

/// Simplifie un anneau en gardant au moins 4 sommets
fn simplify_ring(ring: &LineString, tolerance: f64) -> LineString {
    let simplified = ring.simplify(&tolerance);
    if simplified.0.len() < 4 {
        ring.clone()
    } else {
        simplified
    }
}

fn simplify_polygon(polygon: &Polygon, tolerance: f64) -> Polygon {
    Polygon::new(
        simplify_ring(polygon.exterior(), tolerance),
        polygon
            .interiors()
            .iter()
            .map(|ring| simplify_ring(ring, tolerance))
            .collect(),
    )
}

/// Douglas-Peucker sur les lignes et anneaux
pub fn simplify_geometry(geometry: &Geometry, tolerance: f64) -> Geometry {
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(&tolerance)),
        Geometry::Polygon(p) => Geometry::Polygon(simplify_polygon(p, tolerance)),
        Geometry::MultiPolygon(mp) => {
            Geometry::MultiPolygon(MultiPolygon::new(mp.iter().map(|p| simplify_polygon(p, tolerance)).collect()))
        }
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(geo::GeometryCollection(
            gc.iter().map(|g| simplify_geometry(g, tolerance)).collect(),
        )),
        other => other.clone(),
    }
}

/// Gestionnaire aperçu / dataset complet
#[derive(Debug)]
pub struct PreviewManager {
    full: Arc<Dataset>,
    options: PreviewOptions,
    preview: Dataset,
    selection: Selection,
}

impl PreviewManager {
    /// Construit le gestionnaire et génère un premier aperçu
    pub fn new(full: Arc<Dataset>, options: PreviewOptions) -> Result<Self, PreviewError> {
        let source_srid = full.metadata.source_srid;
        let mut manager = Self {
            full,
            options,
            preview: Dataset::new(Vec::new(), source_srid, ProcessorStats::new()),
            selection: Selection::default(),
        };
        manager.regenerate()?;
        Ok(manager)
    }

    pub fn full(&self) -> &Arc<Dataset> {
        &self.full
    }

    pub fn preview(&self) -> &Dataset {
        &self.preview
    }

    pub fn options(&self) -> &PreviewOptions {
        &self.options
    }

    /// Change les options et régénère l'aperçu
    pub fn set_options(&mut self, options: PreviewOptions) -> Result<&Dataset, PreviewError> {
        self.options = options;
        self.regenerate()
    }

    /// Recalcule l'aperçu depuis le dataset complet
    pub fn regenerate(&mut self) -> Result<&Dataset, PreviewError> {
        let indices = pick_indices(self.full.len(), self.options.max_features, self.options.sampling);
        let features: Vec<CanonicalFeature> = indices.iter().map(|&i| self.full.features[i].clone()).collect();
        let mut preview = Dataset::new(features, self.full.metadata.source_srid, ProcessorStats::new());

        if let Some(target) = self.options.target_srid {
            match self.full.metadata.source_srid {
                Some(source) => {
                    let reprojector = SmartReprojector::new(source, target).map_err(PreviewError::Reprojection)?;
                    preview = reprojector
                        .transform_dataset(&preview)
                        .map_err(PreviewError::Reprojection)?;
                }
                None => warn!(target, "Source SRID unknown, preview kept in source coordinates"),
            }
        }

        if let Some(tolerance) = self.options.simplify_tolerance.filter(|t| *t > 0.0) {
            let srid = preview.metadata.source_srid;
            let stats = std::mem::take(&mut preview.stats);
            let simplified: Vec<CanonicalFeature> = preview
                .features
                .into_par_iter()
                .map(|feature| CanonicalFeature {
                    geometry: simplify_geometry(&feature.geometry, tolerance),
                    ..feature
                })
                .collect();
            preview = Dataset::new(simplified, srid, stats);
        }

        debug!(
            full = self.full.len(),
            preview = preview.len(),
            srid = ?preview.metadata.source_srid,
            "Preview regenerated"
        );
        self.preview = preview;
        Ok(&self.preview)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Ajoute des identifiants à la sélection (tout ou rien)
    pub fn select(&mut self, ids: impl IntoIterator<Item = u64>) -> Result<(), PreviewError> {
        let ids: Vec<u64> = ids.into_iter().collect();
        let unknown: Vec<u64> = ids.iter().copied().filter(|id| self.full.get(*id).is_none()).collect();
        if !unknown.is_empty() {
            return Err(PreviewError::UnknownFeatures(unknown));
        }
        self.selection.ids.extend(ids);
        Ok(())
    }

    pub fn deselect(&mut self, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            self.selection.ids.remove(&id);
        }
    }

    pub fn select_all(&mut self) {
        self.selection.ids = self.full.features.iter().map(|f| f.id).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.ids.clear();
    }

    /// Features sélectionnées, lues dans le dataset complet (non transformé)
    pub fn selected_features(&self) -> Vec<&CanonicalFeature> {
        self.selection.ids().filter_map(|id| self.full.get(id)).collect()
    }
}
