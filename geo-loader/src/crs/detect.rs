//! Détection du système de coordonnées à partir de l'emprise
//!
//! Table de règles ordonnée : la première règle dont le rectangle contient
//! toute l'emprise gagne.

use crate::bounds::Bounds;

use super::{SRID_LV03, SRID_LV95, SRID_WGS84};

/// Règle de détection
#[derive(Debug, Clone, Copy)]
pub struct DetectionRule {
    pub srid: u32,
    pub name: &'static str,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
}

impl DetectionRule {
    /// Vérifie que l'emprise tient entièrement dans la règle
    pub fn matches(&self, bounds: &Bounds) -> bool {
        bounds.is_valid()
            && bounds.min_x >= self.x_range.0
            && bounds.max_x <= self.x_range.1
            && bounds.min_y >= self.y_range.0
            && bounds.max_y <= self.y_range.1
    }
}

/// Règles par défaut, dans l'ordre d'évaluation
pub static DETECTION_RULES: &[DetectionRule] = &[
    DetectionRule {
        srid: SRID_LV95,
        name: "CH1903+ / LV95",
        x_range: (2_480_000.0, 2_840_000.0),
        y_range: (1_070_000.0, 1_300_000.0),
    },
    DetectionRule {
        srid: SRID_LV03,
        name: "CH1903 / LV03",
        x_range: (480_000.0, 900_000.0),
        y_range: (0.0, 400_000.0),
    },
    DetectionRule {
        srid: SRID_WGS84,
        name: "WGS 84",
        x_range: (-180.0, 180.0),
        y_range: (-90.0, 90.0),
    },
];

/// Devine le SRID d'une emprise avec les règles par défaut
///
/// Retourne `None` quand aucune règle ne s'applique : l'appelant doit alors
/// fournir le SRID source explicitement.
pub fn detect_srid(bounds: &Bounds) -> Option<u32> {
    detect_with(DETECTION_RULES, bounds)
}

/// Devine le SRID avec une table de règles fournie
pub fn detect_with(rules: &[DetectionRule], bounds: &Bounds) -> Option<u32> {
    let rule = rules.iter().find(|rule| rule.matches(bounds))?;
    tracing::debug!(srid = rule.srid, name = rule.name, "Detected coordinate system");
    Some(rule.srid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_swiss_systems() {
        let lv95 = Bounds::new(2_600_000.0, 1_200_000.0, 2_601_000.0, 1_201_000.0);
        let lv03 = Bounds::new(600_000.0, 200_000.0, 601_000.0, 201_000.0);
        assert_eq!(detect_srid(&lv95), Some(2056));
        assert_eq!(detect_srid(&lv03), Some(21781));
    }

    #[test]
    fn test_detect_geographic() {
        let bounds = Bounds::new(7.0, 46.0, 8.0, 47.0);
        assert_eq!(detect_srid(&bounds), Some(4326));
    }

    #[test]
    fn test_unresolved() {
        let mercator = Bounds::new(828_000.0, 5_933_000.0, 829_000.0, 5_934_000.0);
        assert_eq!(detect_srid(&mercator), None);

        // Emprise à cheval sur deux règles
        let mixed = Bounds::new(7.0, 46.0, 600_000.0, 200_000.0);
        assert_eq!(detect_srid(&mixed), None);
    }
}
