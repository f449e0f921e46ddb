//! Types d'erreurs pour le crate geo-loader
//!
//! Seules les erreurs structurelles remontent ici. Les problèmes par entité
//! (coordonnées invalides, bloc manquant...) sont accumulés dans
//! [`ProcessorStats`](crate::stats::ProcessorStats) et ne sont jamais propagés.

use thiserror::Error;

/// Erreurs pouvant survenir lors de la résolution ou du parsing d'un fichier
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Erreur d'I/O lors de la lecture d'un fichier
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Extension non reconnue par le registre de formats
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Fichiers compagnons obligatoires absents
    #[error("Missing required companion files for {main}: {}", missing.join(", "))]
    MissingRequiredCompanion { main: String, missing: Vec<String> },

    /// Fichier plus gros que la limite du registre
    #[error("File {name} is too large ({size} bytes, max {max})")]
    FileTooLarge { name: String, size: usize, max: usize },

    /// En-tête binaire invalide
    #[error("Invalid header in {file}: {reason}")]
    InvalidHeader { file: String, reason: String },

    /// Erreur de parsing d'un fichier
    #[error("Parse error in {file}: {reason}")]
    ParseError { file: String, reason: String },

    /// Texte délimité sans colonnes de coordonnées reconnaissables
    #[error("No coordinate columns found in {file} (headers: {})", headers.join(", "))]
    NoCoordinateColumns { file: String, headers: Vec<String> },

    /// Le parsing n'a produit aucune feature et aucune erreur
    #[error("No features found in {0}")]
    EmptyDataset(String),

    /// Un parsing du même fichier est déjà en cours
    #[error("A parse of {0} is already in flight")]
    ParseInFlight(String),

    /// Budget mémoire épuisé après toutes les tentatives
    #[error("Memory budget exhausted: requested {requested} bytes, {in_use}/{budget} in use after {attempts} attempts")]
    MemoryBudgetExhausted {
        requested: usize,
        in_use: usize,
        budget: usize,
        attempts: u32,
    },

    /// Parsing interrompu par l'appelant
    #[error("Parse of {0} was cancelled")]
    Cancelled(String),

    /// Système de coordonnées non supporté
    #[error("Unsupported coordinate system: EPSG:{0}")]
    UnsupportedSrid(u32),

    /// Erreur du parser GeoJSON
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// Erreur du lecteur CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Alias de résultat du crate
pub type Result<T, E = LoaderError> = std::result::Result<T, E>;

impl LoaderError {
    /// Crée une erreur de parsing avec contexte
    pub fn parse_error(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur d'en-tête invalide
    pub fn invalid_header(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Indique si l'erreur est structurelle (fichier rejeté avant conversion)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_)
                | Self::MissingRequiredCompanion { .. }
                | Self::FileTooLarge { .. }
                | Self::InvalidHeader { .. }
                | Self::ParseError { .. }
                | Self::NoCoordinateColumns { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_companion_message_lists_extensions() {
        let err = LoaderError::MissingRequiredCompanion {
            main: "roads.shp".into(),
            missing: vec!["shx".into(), "dbf".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required companion files for roads.shp: shx, dbf"
        );
        assert!(err.is_structural());
    }

    #[test]
    fn test_budget_error_is_not_structural() {
        let err = LoaderError::MemoryBudgetExhausted {
            requested: 10,
            in_use: 5,
            budget: 12,
            attempts: 5,
        };
        assert!(!err.is_structural());
    }
}
