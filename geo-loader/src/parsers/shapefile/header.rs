//! En-tête commun des fichiers .shp et .shx (100 octets)

use crate::bounds::Bounds;
use crate::error::{LoaderError, Result};

pub const HEADER_LENGTH: usize = 100;
pub const FILE_CODE: i32 = 9994;
pub const VERSION: i32 = 1000;

/// Types de forme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
    MultiPatch,
}

/// Famille géométrique, indépendante de Z/M
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeFamily {
    Null,
    Point,
    MultiPoint,
    PolyLine,
    Polygon,
    MultiPatch,
}

impl ShapeType {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Null,
            1 => Self::Point,
            3 => Self::PolyLine,
            5 => Self::Polygon,
            8 => Self::MultiPoint,
            11 => Self::PointZ,
            13 => Self::PolyLineZ,
            15 => Self::PolygonZ,
            18 => Self::MultiPointZ,
            21 => Self::PointM,
            23 => Self::PolyLineM,
            25 => Self::PolygonM,
            28 => Self::MultiPointM,
            31 => Self::MultiPatch,
            _ => return None,
        })
    }

    pub fn family(self) -> ShapeFamily {
        match self {
            Self::Null => ShapeFamily::Null,
            Self::Point | Self::PointZ | Self::PointM => ShapeFamily::Point,
            Self::MultiPoint | Self::MultiPointZ | Self::MultiPointM => ShapeFamily::MultiPoint,
            Self::PolyLine | Self::PolyLineZ | Self::PolyLineM => ShapeFamily::PolyLine,
            Self::Polygon | Self::PolygonZ | Self::PolygonM => ShapeFamily::Polygon,
            Self::MultiPatch => ShapeFamily::MultiPatch,
        }
    }

    pub fn has_z(self) -> bool {
        matches!(
            self,
            Self::PointZ | Self::PolyLineZ | Self::PolygonZ | Self::MultiPointZ | Self::MultiPatch
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Point => "Point",
            Self::PolyLine => "PolyLine",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::PointZ => "PointZ",
            Self::PolyLineZ => "PolyLineZ",
            Self::PolygonZ => "PolygonZ",
            Self::MultiPointZ => "MultiPointZ",
            Self::PointM => "PointM",
            Self::PolyLineM => "PolyLineM",
            Self::PolygonM => "PolygonM",
            Self::MultiPointM => "MultiPointM",
            Self::MultiPatch => "MultiPatch",
        }
    }
}

/// En-tête décodé
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeHeader {
    /// Longueur du fichier en octets (déclarée en mots de 16 bits)
    pub file_length: usize,
    /// Code brut du type de forme
    pub shape_code: i32,
    pub bounds: Bounds,
}

impl ShapeHeader {
    pub fn shape_type(&self) -> Option<ShapeType> {
        ShapeType::from_code(self.shape_code)
    }
}

#[inline]
pub(crate) fn be_i32(data: &[u8], offset: usize) -> Option<i32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_be_bytes)
}

#[inline]
pub(crate) fn le_i32(data: &[u8], offset: usize) -> Option<i32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
}

#[inline]
pub(crate) fn le_f64(data: &[u8], offset: usize) -> Option<f64> {
    data.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(f64::from_le_bytes)
}

/// Décode et valide un en-tête .shp ou .shx
pub fn parse_header(data: &[u8], file: &str) -> Result<ShapeHeader> {
    if data.len() < HEADER_LENGTH {
        return Err(LoaderError::invalid_header(
            file,
            format!(
                "buffer too small for header (got {}, need {})",
                data.len(),
                HEADER_LENGTH
            ),
        ));
    }

    let field = |offset| le_f64(data, offset).unwrap_or(f64::NAN);
    let file_code = be_i32(data, 0).unwrap_or_default();
    let length_words = be_i32(data, 24).unwrap_or_default();
    let version = le_i32(data, 28).unwrap_or_default();
    let shape_code = le_i32(data, 32).unwrap_or_default();

    if file_code != FILE_CODE {
        return Err(LoaderError::invalid_header(
            file,
            format!("incorrect file code (got {}, expected {})", file_code, FILE_CODE),
        ));
    }

    let file_length = usize::try_from(length_words).unwrap_or(0) * 2;
    if file_length < HEADER_LENGTH || file_length > data.len() {
        return Err(LoaderError::invalid_header(
            file,
            format!(
                "incorrect file length (got {}, buffer size {})",
                file_length,
                data.len()
            ),
        ));
    }

    if version != VERSION {
        return Err(LoaderError::invalid_header(
            file,
            format!("unsupported version (got {}, expected {})", version, VERSION),
        ));
    }

    let bounds = Bounds::new(field(36), field(44), field(52), field(60));
    if !bounds.to_array().iter().all(|v| v.is_finite()) {
        return Err(LoaderError::invalid_header(
            file,
            format!("invalid bounding box coordinates {:?}", bounds.to_array()),
        ));
    }

    Ok(ShapeHeader {
        file_length,
        shape_code,
        bounds,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// En-tête de test valide pour un fichier de `file_length` octets
    pub(crate) fn header_bytes(shape_code: i32, file_length: usize, bbox: [f64; 4]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LENGTH];
        buf[0..4].copy_from_slice(&FILE_CODE.to_be_bytes());
        buf[24..28].copy_from_slice(&((file_length / 2) as i32).to_be_bytes());
        buf[28..32].copy_from_slice(&VERSION.to_le_bytes());
        buf[32..36].copy_from_slice(&shape_code.to_le_bytes());
        for (i, value) in bbox.iter().enumerate() {
            let at = 36 + i * 8;
            buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_valid_header() {
        let data = header_bytes(1, 100, [1.0, 2.0, 3.0, 4.0]);
        let header = parse_header(&data, "a.shp").unwrap();
        assert_eq!(header.shape_type(), Some(ShapeType::Point));
        assert_eq!(header.bounds.to_array(), [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_invalid_headers() {
        assert!(matches!(
            parse_header(&[0u8; 50], "a.shp"),
            Err(LoaderError::InvalidHeader { .. })
        ));

        let mut bad_code = header_bytes(1, 100, [0.0; 4]);
        bad_code[0..4].copy_from_slice(&1234i32.to_be_bytes());
        assert!(parse_header(&bad_code, "a.shp").is_err());

        let too_long = header_bytes(1, 400, [0.0; 4]);
        assert!(parse_header(&too_long, "a.shp").is_err());

        let mut bad_version = header_bytes(1, 100, [0.0; 4]);
        bad_version[28..32].copy_from_slice(&999i32.to_le_bytes());
        assert!(parse_header(&bad_version, "a.shp").is_err());

        let nan_box = header_bytes(1, 100, [f64::NAN, 0.0, 1.0, 1.0]);
        assert!(parse_header(&nan_box, "a.shp").is_err());
    }

    #[test]
    fn test_shape_type_table() {
        assert_eq!(ShapeType::from_code(15).map(ShapeType::family), Some(ShapeFamily::Polygon));
        assert!(ShapeType::from_code(13).is_some_and(ShapeType::has_z));
        assert!(!ShapeType::from_code(23).is_some_and(ShapeType::has_z));
        assert_eq!(ShapeType::from_code(999), None);
    }
}
