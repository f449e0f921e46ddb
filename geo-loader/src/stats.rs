//! Statistiques de traitement et erreurs par entité

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::types::GeometryKind;

/// Nombre maximal d'erreurs conservées avec leurs détails
///
/// Au-delà, seules les compteurs par type progressent.
pub const MAX_RECORDED_ISSUES: usize = 1_000;

/// Catégorie d'erreur non fatale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Type d'entité ou de record non pris en charge
    UnsupportedEntity,
    /// Coordonnées absentes ou non finies
    InvalidCoordinates,
    /// Référence à un bloc DXF introuvable
    MissingBlock,
    /// Géométrie inexploitable (anneau trop court, géométrie nulle...)
    InvalidGeometry,
    /// Échec de reprojection d'un tuple
    TransformFailed,
    /// Record illisible (tronqué, longueur incohérente)
    MalformedRecord,
}

impl IssueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedEntity => "unsupported_entity",
            Self::InvalidCoordinates => "invalid_coordinates",
            Self::MissingBlock => "missing_block",
            Self::InvalidGeometry => "invalid_geometry",
            Self::TransformFailed => "transform_failed",
            Self::MalformedRecord => "malformed_record",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Erreur non fatale avec son contexte
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub message: String,
    pub details: Value,
}

impl ProcessingIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>, details: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            details,
        }
    }
}

/// Compteurs courants d'un traitement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStats {
    /// Nombre de features canoniques produites
    pub feature_count: usize,

    /// Nombre de features par type de géométrie
    pub per_type_counts: BTreeMap<GeometryKind, usize>,

    /// Nombre de tuples dont la reprojection a échoué
    pub failed_transformations: usize,

    /// Nombre d'erreurs par catégorie (y compris celles non conservées)
    pub issue_counts: BTreeMap<IssueKind, usize>,

    /// Erreurs détaillées (bornées à `MAX_RECORDED_ISSUES`)
    pub errors: Vec<ProcessingIssue>,
}

impl ProcessorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre une feature produite
    pub fn record_feature(&mut self, kind: GeometryKind) {
        self.feature_count += 1;
        *self.per_type_counts.entry(kind).or_default() += 1;
    }

    /// Enregistre une erreur non fatale
    pub fn record_issue(&mut self, issue: ProcessingIssue) {
        *self.issue_counts.entry(issue.kind).or_default() += 1;
        if self.errors.len() < MAX_RECORDED_ISSUES {
            self.errors.push(issue);
        }
    }

    /// Raccourci pour `record_issue`
    pub fn issue(&mut self, kind: IssueKind, message: impl Into<String>, details: Value) {
        self.record_issue(ProcessingIssue::new(kind, message, details));
    }

    /// Enregistre des échecs de reprojection
    pub fn record_failed_transformations(&mut self, count: usize) {
        self.failed_transformations += count;
    }

    /// Nombre total d'erreurs (conservées ou non)
    pub fn issue_count(&self) -> usize {
        self.issue_counts.values().sum()
    }

    pub fn count_of(&self, kind: IssueKind) -> usize {
        self.issue_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Fusionne les statistiques d'un chunk
    pub fn merge(&mut self, other: ProcessorStats) {
        self.feature_count += other.feature_count;
        for (kind, count) in other.per_type_counts {
            *self.per_type_counts.entry(kind).or_default() += count;
        }
        self.failed_transformations += other.failed_transformations;
        for (kind, count) in other.issue_counts {
            *self.issue_counts.entry(kind).or_default() += count;
        }
        let room = MAX_RECORDED_ISSUES.saturating_sub(self.errors.len());
        self.errors.extend(other.errors.into_iter().take(room));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_and_merge() {
        let mut stats = ProcessorStats::new();
        stats.record_feature(GeometryKind::Point);
        stats.issue(IssueKind::MissingBlock, "Block not found", json!({"block": "TREE"}));

        let mut chunk = ProcessorStats::new();
        chunk.record_feature(GeometryKind::Point);
        chunk.record_feature(GeometryKind::Polygon);
        chunk.record_failed_transformations(2);
        stats.merge(chunk);

        assert_eq!(stats.feature_count, 3);
        assert_eq!(stats.per_type_counts[&GeometryKind::Point], 2);
        assert_eq!(stats.failed_transformations, 2);
        assert_eq!(stats.count_of(IssueKind::MissingBlock), 1);
    }

    #[test]
    fn test_recorded_issues_are_bounded() {
        let mut stats = ProcessorStats::new();
        for i in 0..MAX_RECORDED_ISSUES + 10 {
            stats.issue(IssueKind::InvalidCoordinates, "NaN", json!({"row": i}));
        }
        assert_eq!(stats.errors.len(), MAX_RECORDED_ISSUES);
        assert_eq!(stats.issue_count(), MAX_RECORDED_ISSUES + 10);
    }

    #[test]
    fn test_issue_serializes_with_type_tag() {
        let issue = ProcessingIssue::new(IssueKind::UnsupportedEntity, "HATCH", json!(null));
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "unsupported_entity");
    }
}
