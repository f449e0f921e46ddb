//! Export vers GeoJSON avec geozero (streaming, zero-copy)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use geo_loader::{CanonicalFeature, Dataset};
use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;

/// Exporte un dataset en FeatureCollection, retourne le nombre de features écrites
///
/// `srid` renseigne le membre `crs` ; les coordonnées sont écrites telles quelles.
pub fn export_dataset(dataset: &Dataset, srid: Option<u32>, output_path: &Path) -> Result<usize> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    let count = write_feature_collection(&mut writer, &dataset.features, srid)?;
    writer.flush()?;
    Ok(count)
}

/// Écrit une FeatureCollection feature par feature
pub fn write_feature_collection<'a, W: Write>(
    writer: &mut W,
    features: impl IntoIterator<Item = &'a CanonicalFeature>,
    srid: Option<u32>,
) -> Result<usize> {
    write!(writer, r#"{{"type":"FeatureCollection","#)?;
    if let Some(srid) = srid {
        write!(
            writer,
            r#""crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:EPSG::{}"}}}},"#,
            srid
        )?;
    }
    write!(writer, r#""features":["#)?;

    let mut count = 0;
    for feature in features {
        if count > 0 {
            write!(writer, ",")?;
        }
        write_feature(writer, feature)?;
        count += 1;
    }

    write!(writer, "]}}")?;
    Ok(count)
}

fn write_feature<W: Write>(writer: &mut W, feature: &CanonicalFeature) -> Result<()> {
    write!(writer, r#"{{"type":"Feature","id":{},"geometry":"#, feature.id)?;

    let mut geom_buf = Vec::new();
    let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
    feature
        .geometry
        .process_geom(&mut geom_writer)
        .with_context(|| format!("Failed to encode geometry of feature {}", feature.id))?;
    writer.write_all(&geom_buf)?;

    write!(writer, r#","properties":"#)?;
    serde_json::to_writer(&mut *writer, &feature.properties)?;
    write!(writer, "}}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, LineString, Point};
    use geo_loader::ProcessorStats;
    use serde_json::{json, Map, Value};

    fn feature(id: u64, geometry: Geometry, name: &str) -> CanonicalFeature {
        let mut properties = Map::new();
        properties.insert("name".to_string(), json!(name));
        properties.insert("height".to_string(), json!(12.5));
        CanonicalFeature::new(id, geometry, properties)
    }

    #[test]
    fn test_write_collection_is_valid_geojson() {
        let features = vec![
            feature(0, Geometry::Point(Point::new(7.44, 46.95)), "Bern \"city\""),
            feature(
                1,
                Geometry::LineString(LineString::from(vec![(7.0, 46.0), (7.5, 46.5)])),
                "line",
            ),
        ];

        let mut buffer = Vec::new();
        let count = write_feature_collection(&mut buffer, &features, Some(4326)).unwrap();
        assert_eq!(count, 2);

        let value: Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::4326");
        assert_eq!(value["features"][0]["id"], 0);
        assert_eq!(value["features"][0]["properties"]["name"], "Bern \"city\"");
        assert_eq!(value["features"][0]["geometry"]["type"], "Point");
        assert_eq!(value["features"][1]["geometry"]["type"], "LineString");
        assert_eq!(value["features"][1]["properties"]["height"], 12.5);

        let parsed: ::geojson::GeoJson = std::str::from_utf8(&buffer).unwrap().parse().unwrap();
        assert!(matches!(parsed, ::geojson::GeoJson::FeatureCollection(_)));
    }

    #[test]
    fn test_empty_collection_without_crs() {
        let mut buffer = Vec::new();
        let count = write_feature_collection(&mut buffer, std::iter::empty(), None).unwrap();
        assert_eq!(count, 0);
        let value: Value = serde_json::from_slice(&buffer).unwrap();
        assert!(value.get("crs").is_none());
        assert_eq!(value["features"], json!([]));
    }

    #[test]
    fn test_export_dataset() {
        let features = vec![feature(0, Geometry::Point(Point::new(2_600_000.0, 1_200_000.0)), "origin")];
        let dataset = Dataset::new(features, Some(2056), ProcessorStats::new());

        let dir = tempfile::tempdir().unwrap();
        let output_path = dir.path().join("out.geojson");
        assert_eq!(export_dataset(&dataset, Some(2056), &output_path).unwrap(), 1);

        let content = std::fs::read_to_string(&output_path).unwrap();
        assert!(content.contains("EPSG::2056"));
        assert!(content.contains(r#""name":"origin""#));
    }
}
