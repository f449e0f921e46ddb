//! Reprojection : transformations suisses en Rust pur, PROJ en secours
//!
//! Les SRID couverts par `geo_loader::crs` (2056, 21781, 4326, 3857) ne
//! passent jamais par PROJ. Les autres nécessitent le feature `reproject`.

#[cfg(not(feature = "reproject"))]
use anyhow::bail;
use anyhow::{Context, Result};
use geo::Geometry;
use geo_loader::crs::{self, CoordinateTransformer};
use geo_loader::Dataset;

/// Reprojection intelligente
pub enum SmartReprojector {
    /// Source et cible identiques
    Identity(u32),
    /// Transformations suisses (pure Rust, avec repli et inversion d'axes)
    Swiss(CoordinateTransformer),
    /// Reprojection via PROJ
    #[cfg(feature = "reproject")]
    Proj { proj: proj::Proj, target_srid: u32 },
}

impl SmartReprojector {
    pub fn new(source_srid: u32, target_srid: u32) -> Result<Self> {
        if source_srid == target_srid {
            return Ok(Self::Identity(target_srid));
        }

        if crs::is_supported(source_srid) && crs::is_supported(target_srid) {
            let transformer = CoordinateTransformer::new(source_srid, target_srid)
                .context("Failed to create Swiss transformer")?;
            return Ok(Self::Swiss(transformer));
        }

        #[cfg(feature = "reproject")]
        {
            let (source, target) = (format!("EPSG:{}", source_srid), format!("EPSG:{}", target_srid));
            let proj = proj::Proj::new_known_crs(&source, &target, None)
                .with_context(|| format!("Failed to create projection from {} to {}", source, target))?;
            return Ok(Self::Proj { proj, target_srid });
        }

        #[cfg(not(feature = "reproject"))]
        bail!(
            "Reprojection EPSG:{} → EPSG:{} not supported.\n\
             Built-in systems: 2056 (LV95), 21781 (LV03), 4326 (WGS84), 3857 (Web Mercator).\n\
             For other systems, build with: cargo build --features reproject",
            source_srid,
            target_srid
        );
    }

    pub fn target_srid(&self) -> u32 {
        match self {
            Self::Identity(srid) => *srid,
            Self::Swiss(t) => t.target_srid(),
            #[cfg(feature = "reproject")]
            Self::Proj { target_srid, .. } => *target_srid,
        }
    }

    /// Transforme une géométrie
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry> {
        match self {
            Self::Identity(_) => Ok(geom.clone()),
            Self::Swiss(t) => Ok(t.transform_geometry(geom).geometry),
            #[cfg(feature = "reproject")]
            Self::Proj { proj, .. } => proj_geometry(proj, geom),
        }
    }

    /// Copie reprojetée d'un dataset (le dataset source reste intact)
    pub fn transform_dataset(&self, dataset: &Dataset) -> Result<Dataset> {
        match self {
            Self::Identity(srid) => Ok(Dataset::new(dataset.features.clone(), Some(*srid), dataset.stats.clone())),
            Self::Swiss(t) => Ok(t.transform_dataset(dataset)),
            #[cfg(feature = "reproject")]
            Self::Proj { proj, target_srid } => {
                let features = dataset
                    .features
                    .iter()
                    .map(|feature| {
                        Ok(geo_loader::CanonicalFeature {
                            geometry: proj_geometry(proj, &feature.geometry)?,
                            ..feature.clone()
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Dataset::new(features, Some(*target_srid), dataset.stats.clone()))
            }
        }
    }

    /// Description du reprojector utilisé
    pub fn description(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity (no reprojection)",
            Self::Swiss(_) => "swiss (pure Rust)",
            #[cfg(feature = "reproject")]
            Self::Proj { .. } => "proj (PROJ library)",
        }
    }
}

/// Vérifie si le secours PROJ est disponible
pub fn is_proj_available() -> bool {
    cfg!(feature = "reproject")
}

/// Reprojette chaque sommet via PROJ ; la première erreur interrompt la géométrie
#[cfg(feature = "reproject")]
fn proj_geometry(proj: &proj::Proj, geom: &Geometry) -> Result<Geometry> {
    let mut failure = None;
    let projected = crs::map_coords(geom, &mut |coord| match proj.convert((coord.x, coord.y)) {
        Ok((x, y)) => geo::Coord { x, y },
        Err(e) => {
            failure.get_or_insert(e);
            coord
        }
    });
    match failure {
        Some(e) => Err(e).context("Coordinate transformation failed"),
        None => Ok(projected),
    }
}
