//! Registre statique des formats pris en charge
//!
//! Chaque format déclare son extension principale, son type MIME, sa taille
//! maximale et ses fichiers compagnons (obligatoires ou non).

use serde::Serialize;

const MIB: usize = 1024 * 1024;

/// Formats pris en charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Shapefile,
    Dxf,
    Delimited,
    PointCloud,
    GeoJson,
}

impl FormatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shapefile => "shapefile",
            Self::Dxf => "dxf",
            Self::Delimited => "csv",
            Self::PointCloud => "xyz",
            Self::GeoJson => "geojson",
        }
    }

    /// Indique si le format est lu en une seule lecture contiguë
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Shapefile)
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Déclaration d'un fichier compagnon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompanionSpec {
    pub extension: &'static str,
    pub required: bool,
    pub max_size: usize,
}

/// Déclaration d'un format
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FormatSpec {
    pub kind: FormatKind,
    /// Extensions acceptées pour le fichier principal (minuscules, sans point)
    pub extensions: &'static [&'static str],
    pub description: &'static str,
    pub mime_type: &'static str,
    pub max_size: usize,
    pub companions: &'static [CompanionSpec],
}

impl FormatSpec {
    /// Extension principale
    pub fn main_extension(&self) -> &'static str {
        self.extensions[0]
    }

    pub fn required_companions(&self) -> impl Iterator<Item = &CompanionSpec> {
        self.companions.iter().filter(|c| c.required)
    }

    pub fn companion(&self, extension: &str) -> Option<&CompanionSpec> {
        self.companions
            .iter()
            .find(|c| c.extension.eq_ignore_ascii_case(extension))
    }
}

/// Table des formats
pub static FORMATS: &[FormatSpec] = &[
    FormatSpec {
        kind: FormatKind::Shapefile,
        extensions: &["shp"],
        description: "ESRI Shapefile",
        mime_type: "application/x-shapefile",
        max_size: 2048 * MIB,
        companions: &[
            CompanionSpec {
                extension: "shx",
                required: true,
                max_size: 256 * MIB,
            },
            CompanionSpec {
                extension: "dbf",
                required: true,
                max_size: 2048 * MIB,
            },
            CompanionSpec {
                extension: "prj",
                required: false,
                max_size: MIB,
            },
            CompanionSpec {
                extension: "cpg",
                required: false,
                max_size: MIB,
            },
        ],
    },
    FormatSpec {
        kind: FormatKind::Dxf,
        extensions: &["dxf"],
        description: "AutoCAD Drawing Exchange Format",
        mime_type: "image/vnd.dxf",
        max_size: 512 * MIB,
        companions: &[],
    },
    FormatSpec {
        kind: FormatKind::Delimited,
        extensions: &["csv", "tsv", "txt"],
        description: "Delimited text with coordinate columns",
        mime_type: "text/csv",
        max_size: 512 * MIB,
        companions: &[],
    },
    FormatSpec {
        kind: FormatKind::PointCloud,
        extensions: &["xyz", "pts"],
        description: "Point cloud text (x y z)",
        mime_type: "text/plain",
        max_size: 1024 * MIB,
        companions: &[],
    },
    FormatSpec {
        kind: FormatKind::GeoJson,
        extensions: &["geojson", "json"],
        description: "GeoJSON",
        mime_type: "application/geo+json",
        max_size: 512 * MIB,
        companions: &[],
    },
];

/// Extension d'un nom de fichier, en minuscules
pub fn extension_of(name: &str) -> Option<String> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (base, ext) = file_name.rsplit_once('.')?;
    if base.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Nom de base (sans dossier ni extension), en minuscules
pub fn base_name_of(name: &str) -> String {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    file_name
        .rsplit_once('.')
        .map(|(base, _)| base)
        .unwrap_or(file_name)
        .to_ascii_lowercase()
}

/// Recherche le format principal correspondant à une extension
pub fn lookup(extension: &str) -> Option<&'static FormatSpec> {
    FORMATS.iter().find(|spec| {
        spec.extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    })
}

/// Recherche la déclaration d'un format
pub fn spec_for(kind: FormatKind) -> &'static FormatSpec {
    FORMATS
        .iter()
        .find(|spec| spec.kind == kind)
        .unwrap_or(&FORMATS[0])
}

/// Indique si l'extension est celle d'un compagnon d'au moins un format
pub fn is_companion_extension(extension: &str) -> bool {
    FORMATS.iter().any(|spec| spec.companion(extension).is_some())
}
