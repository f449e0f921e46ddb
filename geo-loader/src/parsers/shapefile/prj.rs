//! Lecture du système de coordonnées d'un `.prj` (WKT ESRI / OGC)

use std::sync::OnceLock;

use regex::Regex;

use crate::crs::{SRID_LV03, SRID_LV95, SRID_WEB_MERCATOR, SRID_WGS84};

/// Noms de systèmes reconnus quand le WKT ne porte pas d'autorité EPSG
///
/// L'ordre compte : « CH1903+ » doit être testé avant « CH1903 ».
const NAMES: &[(&str, u32)] = &[
    ("LV95", SRID_LV95),
    ("CH1903+", SRID_LV95),
    ("CH1903_PLUS", SRID_LV95),
    ("LV03", SRID_LV03),
    ("CH1903", SRID_LV03),
    ("PSEUDO-MERCATOR", SRID_WEB_MERCATOR),
    ("PSEUDO_MERCATOR", SRID_WEB_MERCATOR),
    ("WEB_MERCATOR", SRID_WEB_MERCATOR),
    ("POPULAR VISUALISATION", SRID_WEB_MERCATOR),
];

fn authority_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#).ok())
        .as_ref()
}

/// SRID déclaré par un WKT
///
/// L'autorité de plus haut niveau (la dernière dans le texte) l'emporte ;
/// à défaut on se rabat sur les noms connus.
pub fn srid_from_wkt(wkt: &str) -> Option<u32> {
    let wkt = wkt.trim();
    if wkt.is_empty() {
        return None;
    }

    if let Some(srid) = authority_regex()
        .and_then(|re| re.captures_iter(wkt).last())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(srid);
    }

    let upper = wkt.to_ascii_uppercase();
    for &(name, srid) in NAMES {
        if upper.contains(name) {
            return Some(srid);
        }
    }

    let geographic = upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS");
    if geographic && (upper.contains("WGS_1984") || upper.contains("WGS 84") || upper.contains("WGS84")) {
        return Some(SRID_WGS84);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esri_lv95() {
        let wkt = r#"PROJCS["CH1903+_LV95",GEOGCS["GCS_CH1903+",DATUM["D_CH1903+",SPHEROID["Bessel_1841",6377397.155,299.1528128]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Hotine_Oblique_Mercator_Azimuth_Center"],UNIT["Meter",1.0]]"#;
        assert_eq!(srid_from_wkt(wkt), Some(2056));
    }

    #[test]
    fn test_esri_lv03() {
        let wkt = r#"PROJCS["CH1903_LV03",GEOGCS["GCS_CH1903",DATUM["D_CH1903",SPHEROID["Bessel_1841",6377397.155,299.1528128]]]]"#;
        assert_eq!(srid_from_wkt(wkt), Some(21781));
    }

    #[test]
    fn test_authority_wins() {
        let wkt = r#"PROJCS["WGS 84 / Pseudo-Mercator",GEOGCS["WGS 84",AUTHORITY["EPSG","4326"]],AUTHORITY["EPSG","3857"]]"#;
        assert_eq!(srid_from_wkt(wkt), Some(3857));
    }

    #[test]
    fn test_plain_wgs84() {
        let wkt = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]]]"#;
        assert_eq!(srid_from_wkt(wkt), Some(4326));
    }

    #[test]
    fn test_unknown() {
        assert_eq!(srid_from_wkt(""), None);
        assert_eq!(srid_from_wkt(r#"PROJCS["RGF93_Lambert_93"]"#), None);
    }
}
