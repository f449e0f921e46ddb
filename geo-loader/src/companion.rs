//! Regroupement d'un lot de fichiers en fichier principal + compagnons
//!
//! Un fichier est « principal » quand son extension figure dans le registre.
//! Ses compagnons sont les fichiers de même nom de base (insensible à la
//! casse) portant une extension déclarée par le format. Les fichiers en trop
//! sont ignorés.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use crate::error::{LoaderError, Result};
use crate::registry::{self, FormatKind, FormatSpec};

/// Un fichier en mémoire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
    pub data: Bytes,
}

impl FileRef {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Lit un fichier depuis le disque
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, data))
    }

    pub fn extension(&self) -> Option<String> {
        registry::extension_of(&self.name)
    }

    pub fn base_name(&self) -> String {
        registry::base_name_of(&self.name)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Fichier principal et ses compagnons validés
#[derive(Debug, Clone)]
pub struct CompanionFileSet {
    pub main: FileRef,
    pub format: FormatKind,
    /// Compagnons indexés par extension (minuscules)
    pub companions: BTreeMap<String, FileRef>,
}

impl CompanionFileSet {
    /// Déclaration du format principal
    pub fn spec(&self) -> &'static FormatSpec {
        registry::spec_for(self.format)
    }

    pub fn companion(&self, extension: &str) -> Option<&FileRef> {
        self.companions.get(&extension.to_ascii_lowercase())
    }

    /// Taille cumulée de tous les fichiers
    pub fn total_size(&self) -> usize {
        self.main.len() + self.companions.values().map(FileRef::len).sum::<usize>()
    }

    /// Empreinte blake3 du contenu (principal puis compagnons par extension)
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.main.data);
        for (extension, file) in &self.companions {
            hasher.update(extension.as_bytes());
            hasher.update(&file.data);
        }
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }
}

fn check_size(file: &FileRef, max: usize) -> Result<()> {
    if file.len() > max {
        return Err(LoaderError::FileTooLarge {
            name: file.name.clone(),
            size: file.len(),
            max,
        });
    }
    Ok(())
}

/// Construit le jeu de fichiers pour un fichier principal donné
fn assemble(main: &FileRef, spec: &'static FormatSpec, files: &[FileRef]) -> Result<CompanionFileSet> {
    check_size(main, spec.max_size)?;

    let base = main.base_name();
    let mut companions = BTreeMap::new();

    for file in files {
        if std::ptr::eq(file, main) || file.base_name() != base {
            continue;
        }
        let Some(extension) = file.extension() else {
            continue;
        };
        let Some(companion) = spec.companion(&extension) else {
            continue;
        };
        if companions.contains_key(&extension) {
            continue;
        }
        check_size(file, companion.max_size)?;
        debug!(main = %main.name, companion = %file.name, "Matched companion file");
        companions.insert(extension, file.clone());
    }

    let missing: Vec<String> = spec
        .required_companions()
        .filter(|c| !companions.contains_key(c.extension))
        .map(|c| c.extension.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(LoaderError::MissingRequiredCompanion {
            main: main.name.clone(),
            missing,
        });
    }

    Ok(CompanionFileSet {
        main: main.clone(),
        format: spec.kind,
        companions,
    })
}

/// Regroupe un lot de fichiers en jeux principal + compagnons
///
/// Échoue dès qu'un fichier principal n'a pas tous ses compagnons
/// obligatoires, ou si aucun fichier principal n'est reconnu.
pub fn resolve(files: &[FileRef]) -> Result<Vec<CompanionFileSet>> {
    let mut sets = Vec::new();

    for file in files {
        let Some(spec) = file.extension().and_then(|ext| registry::lookup(&ext)) else {
            continue;
        };
        sets.push(assemble(file, spec, files)?);
    }

    if sets.is_empty() {
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        return Err(LoaderError::UnsupportedFormat(names.join(", ")));
    }

    debug!(sets = sets.len(), files = files.len(), "Resolved file sets");
    Ok(sets)
}

/// Comme [`resolve`], en ne gardant que le premier jeu
pub fn resolve_one(files: &[FileRef]) -> Result<CompanionFileSet> {
    let mut sets = resolve(files)?;
    Ok(sets.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> FileRef {
        FileRef::new(name, Bytes::from_static(b"data"))
    }

    #[test]
    fn test_shapefile_with_companions() {
        let files = vec![
            file("Roads.SHP"),
            file("roads.shx"),
            file("ROADS.dbf"),
            file("roads.prj"),
            file("other.dbf"),
            file("notes.md"),
        ];
        let set = resolve_one(&files).unwrap();
        assert_eq!(set.format, FormatKind::Shapefile);
        let extensions: Vec<_> = set.companions.keys().cloned().collect();
        assert_eq!(extensions, vec!["dbf", "prj", "shx"]);
        assert_eq!(set.companion("DBF").map(|f| f.name.as_str()), Some("ROADS.dbf"));
    }

    #[test]
    fn test_missing_required_companions_are_named() {
        let files = vec![file("roads.shp"), file("roads.prj")];
        match resolve(&files) {
            Err(LoaderError::MissingRequiredCompanion { main, missing }) => {
                assert_eq!(main, "roads.shp");
                assert_eq!(missing, vec!["shx", "dbf"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_optional_companions_may_be_absent() {
        let files = vec![file("a.shp"), file("a.shx"), file("a.dbf")];
        let set = resolve_one(&files).unwrap();
        assert!(set.companion("prj").is_none());
        assert!(set.companion("cpg").is_none());
    }

    #[test]
    fn test_no_main_file() {
        let files = vec![file("a.dbf"), file("b.prj")];
        assert!(matches!(resolve(&files), Err(LoaderError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_multiple_mains() {
        let files = vec![file("points.csv"), file("drawing.dxf")];
        let sets = resolve(&files).unwrap();
        let kinds: Vec<_> = sets.iter().map(|s| s.format).collect();
        assert_eq!(kinds, vec![FormatKind::Delimited, FormatKind::Dxf]);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = resolve_one(&[file("p.csv")]).unwrap();
        let b = resolve_one(&[FileRef::new("p.csv", Bytes::from_static(b"other"))]).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }
}
