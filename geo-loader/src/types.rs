//! Types de données pour le crate geo-loader

use std::collections::{BTreeMap, BTreeSet};

use geo::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bounds::{Bounds, BoundsAccumulator};
use crate::registry::FormatKind;
use crate::stats::ProcessorStats;

/// Attributs d'une feature, dans l'ordre d'insertion de la source
pub type Properties = serde_json::Map<String, Value>;

/// Types de géométrie canoniques
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryKind {
    /// Type canonique d'une géométrie `geo`
    ///
    /// `Line`, `Rect` et `Triangle` n'existent pas côté GeoJSON : ils sont
    /// rattachés au type qu'ils deviennent une fois sérialisés.
    pub fn of(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Point(_) => Self::Point,
            Geometry::Line(_) | Geometry::LineString(_) => Self::LineString,
            Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => Self::Polygon,
            Geometry::MultiPoint(_) => Self::MultiPoint,
            Geometry::MultiLineString(_) => Self::MultiLineString,
            Geometry::MultiPolygon(_) => Self::MultiPolygon,
            Geometry::GeometryCollection(_) => Self::GeometryCollection,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
        }
    }
}

impl std::fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problèmes détectés sur une géométrie (signalés, jamais réparés)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFlags {
    /// Un anneau non fermé a été fermé en dupliquant son premier point
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unclosed_ring_closed: bool,
    /// L'orientation d'un anneau ne correspondait pas à son rôle (coque/trou)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ring_orientation_fixed: bool,
    /// La source portait une troisième ordonnée
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_z: bool,
    /// Géométrie dégénérée (longueur ou surface nulle)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degenerate: bool,
    /// Sommets consécutifs dupliqués dans un anneau
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub self_touching: bool,
}

impl ValidationFlags {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Une feature normalisée, indépendante du format source
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFeature {
    /// Identifiant stable pendant un parsing (ordre de la source, à partir de 0)
    pub id: u64,

    /// Géométrie (coordonnées jamais vides)
    pub geometry: Geometry,

    /// Attributs ordonnés
    pub properties: Properties,

    /// Problèmes signalés pendant la conversion
    pub flags: ValidationFlags,
}

impl CanonicalFeature {
    pub fn new(id: u64, geometry: Geometry, properties: Properties) -> Self {
        Self {
            id,
            geometry,
            properties,
            flags: ValidationFlags::default(),
        }
    }

    pub fn kind(&self) -> GeometryKind {
        GeometryKind::of(&self.geometry)
    }

    /// Convertit en `geojson::Feature` (id numérique, flags dans `_flags`)
    pub fn to_geojson(&self) -> geojson::Feature {
        let mut properties = self.properties.clone();
        if !self.flags.is_empty() {
            if let Ok(flags) = serde_json::to_value(self.flags) {
                properties.insert("_flags".to_string(), flags);
            }
        }

        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&self.geometry))),
            id: Some(geojson::feature::Id::Number(self.id.into())),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Métadonnées d'un dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    /// SRID source (absent si non résolu)
    pub source_srid: Option<u32>,

    /// Types de géométrie présents
    pub geometry_types: BTreeSet<GeometryKind>,

    /// Emprise [minX, minY, maxX, maxY]
    pub bounds: Bounds,

    /// Noms d'attributs, dans l'ordre de première apparition
    pub property_names: Vec<String>,

    /// Nombre de features
    pub feature_count: usize,
}

impl DatasetMetadata {
    /// Calcule les métadonnées d'un ensemble de features
    pub fn from_features<'a>(
        features: impl IntoIterator<Item = &'a CanonicalFeature>,
        source_srid: Option<u32>,
    ) -> Self {
        let mut geometry_types = BTreeSet::new();
        let mut property_names: Vec<String> = Vec::new();
        let mut seen_names = BTreeSet::new();
        let mut bounds = BoundsAccumulator::new();
        let mut feature_count = 0;

        for feature in features {
            feature_count += 1;
            geometry_types.insert(feature.kind());
            bounds.add_geometry(&feature.geometry);
            for key in feature.properties.keys() {
                if seen_names.insert(key.as_str()) {
                    property_names.push(key.clone());
                }
            }
        }

        Self {
            source_srid,
            geometry_types,
            bounds: bounds.finish(source_srid),
            property_names,
            feature_count,
        }
    }
}

/// Résultat complet d'un parsing
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Features canoniques
    pub features: Vec<CanonicalFeature>,

    /// Métadonnées calculées
    pub metadata: DatasetMetadata,

    /// Statistiques et erreurs non fatales
    pub stats: ProcessorStats,
}

impl Dataset {
    /// Construit un dataset en recalculant ses métadonnées
    pub fn new(features: Vec<CanonicalFeature>, source_srid: Option<u32>, stats: ProcessorStats) -> Self {
        let metadata = DatasetMetadata::from_features(&features, source_srid);
        Self {
            features,
            metadata,
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Recherche une feature par identifiant
    ///
    /// Les ids sont attribués dans l'ordre de la source : on tente d'abord
    /// l'accès direct avant la recherche dichotomique.
    pub fn get(&self, id: u64) -> Option<&CanonicalFeature> {
        if let Some(feature) = usize::try_from(id).ok().and_then(|i| self.features.get(i)) {
            if feature.id == id {
                return Some(feature);
            }
        }
        self.features
            .binary_search_by_key(&id, |f| f.id)
            .ok()
            .map(|i| &self.features[i])
    }
}

/// Colonnes de coordonnées détectées dans un fichier texte
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateColumns {
    pub x: usize,
    pub y: usize,
    pub z: Option<usize>,
    pub x_name: String,
    pub y_name: String,
}

/// Aperçu structurel d'un fichier (résultat de `analyze`)
#[derive(Debug, Clone)]
pub struct StructuralSummary {
    /// Format détecté
    pub format: FormatKind,

    /// Calques (DXF) ou nom de la couche unique
    pub layers: Vec<String>,

    /// Nombre d'entités par type source (ex: LWPOLYLINE, PolygonZ, row)
    pub entity_types: BTreeMap<String, usize>,

    /// Blocs déclarés (DXF)
    pub blocks: Vec<String>,

    /// Échantillon borné de features converties
    pub sample: Vec<CanonicalFeature>,

    /// Emprise initiale (en-tête ou échantillon)
    pub bounds: Bounds,

    /// SRID explicite ou détecté
    pub detected_srid: Option<u32>,

    /// Noms d'attributs
    pub property_names: Vec<String>,

    /// Colonnes de coordonnées (formats texte)
    pub coordinate_columns: Option<CoordinateColumns>,

    /// Nombre de features attendu lorsqu'il est connu à bas coût
    pub estimated_features: Option<usize>,

    /// Problèmes rencontrés sur l'échantillon
    pub stats: ProcessorStats,
}
