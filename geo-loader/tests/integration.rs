//! Tests d'intégration : fichiers écrits sur disque puis chargés par le service

use std::path::{Path, PathBuf};

use geo::Geometry;
use geo_loader::{
    parse_paths, FileRef, FormatKind, GeometryKind, Loader, LoaderError, ParseOptions, ProgressEvent, ProgressSink,
};
use serde_json::json;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn load(paths: &[PathBuf]) -> Vec<FileRef> {
    paths.iter().map(|p| FileRef::from_path(p).unwrap()).collect()
}

/// Shapefile de points (.shp, .shx) avec une bbox cohérente
fn point_shapefile(points: &[(f64, f64)]) -> (Vec<u8>, Vec<u8>) {
    let header = |total: usize| {
        let mut buf = vec![0u8; 100];
        buf[0..4].copy_from_slice(&9994i32.to_be_bytes());
        buf[24..28].copy_from_slice(&((total / 2) as i32).to_be_bytes());
        buf[28..32].copy_from_slice(&1000i32.to_le_bytes());
        buf[32..36].copy_from_slice(&1i32.to_le_bytes());
        let xs = points.iter().map(|p| p.0);
        let ys = points.iter().map(|p| p.1);
        let bbox = [
            xs.clone().fold(f64::INFINITY, f64::min),
            ys.clone().fold(f64::INFINITY, f64::min),
            xs.fold(f64::NEG_INFINITY, f64::max),
            ys.fold(f64::NEG_INFINITY, f64::max),
        ];
        for (i, v) in bbox.iter().enumerate() {
            buf[36 + i * 8..44 + i * 8].copy_from_slice(&v.to_le_bytes());
        }
        buf
    };

    let mut records = Vec::new();
    let mut index = Vec::new();
    for (i, (x, y)) in points.iter().enumerate() {
        let offset = 100 + records.len();
        index.extend_from_slice(&((offset / 2) as i32).to_be_bytes());
        index.extend_from_slice(&10i32.to_be_bytes());
        records.extend_from_slice(&(i as i32 + 1).to_be_bytes());
        records.extend_from_slice(&10i32.to_be_bytes());
        records.extend_from_slice(&1i32.to_le_bytes());
        records.extend_from_slice(&x.to_le_bytes());
        records.extend_from_slice(&y.to_le_bytes());
    }
    let mut shp = header(100 + records.len());
    shp.extend(records);
    let mut shx = header(100 + index.len());
    shx.extend(index);
    (shp, shx)
}

/// Table dBASE à une colonne caractère
fn single_column_dbf(name: &str, width: u8, values: &[&str]) -> Vec<u8> {
    let mut buf = vec![0u8; 32];
    buf[0] = 0x03;
    buf[4..8].copy_from_slice(&(values.len() as u32).to_le_bytes());
    buf[8..10].copy_from_slice(&65u16.to_le_bytes());
    buf[10..12].copy_from_slice(&(1 + width as u16).to_le_bytes());
    let mut descriptor = [0u8; 32];
    descriptor[..name.len()].copy_from_slice(name.as_bytes());
    descriptor[11] = b'C';
    descriptor[16] = width;
    buf.extend_from_slice(&descriptor);
    buf.push(0x0D);
    for value in values {
        buf.push(b' ');
        let mut cell = vec![b' '; width as usize];
        cell[..value.len()].copy_from_slice(value.as_bytes());
        buf.extend(cell);
    }
    buf.push(0x1A);
    buf
}

#[test]
fn test_shapefile_from_disk() {
    let dir = TempDir::new().unwrap();
    let (shp, shx) = point_shapefile(&[(600_000.0, 200_000.0), (683_000.0, 248_000.0)]);
    let paths = [
        write(&dir, "stations.shp", &shp),
        write(&dir, "stations.shx", &shx),
        write(&dir, "stations.dbf", &single_column_dbf("NAME", 10, &["Bern", "Zurich"])),
    ];

    let loader = Loader::new();
    let sets = loader.resolve(&load(&paths)).unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].spec().kind, FormatKind::Shapefile);

    let summary = loader.analyze(&sets[0]).unwrap();
    assert_eq!(summary.detected_srid, Some(21781));

    let options = ParseOptions {
        target_srid: Some(2056),
        ..ParseOptions::default()
    };
    let dataset = loader.parse_blocking(&sets[0], &options, &ProgressSink::new()).unwrap();
    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.features[1].properties["NAME"], json!("Zurich"));
    let Geometry::Point(p) = &dataset.features[0].geometry else {
        panic!("expected a point");
    };
    assert!((p.x() - 2_600_000.0).abs() < 0.01);
    assert!((p.y() - 1_200_000.0).abs() < 0.01);
}

#[test]
fn test_mixed_directory() {
    let dir = TempDir::new().unwrap();
    let csv = write(&dir, "trees.csv", b"id;lon;lat;species\n1;7.44;46.95;oak\n2;8.54;47.37;beech\n");
    let geojson = write(
        &dir,
        "zones.geojson",
        br#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"zone":"A"},"geometry":{"type":"Polygon","coordinates":[[[7,46],[8,46],[8,47],[7,46]]]}}]}"#,
    );
    let xyz = write(&dir, "scan.xyz", b"2600000 1200000 500\n2600010 1200010 501\n");
    let dxf = write(
        &dir,
        "plan.dxf",
        b"0\nSECTION\n2\nENTITIES\n0\nLINE\n8\nwalls\n10\n2600000\n20\n1200000\n11\n2600010\n21\n1200000\n0\nENDSEC\n0\nEOF\n",
    );

    let paths: Vec<&Path> = [&csv, &geojson, &xyz, &dxf].iter().map(|p| p.as_path()).collect();
    let results = parse_paths(&paths, &ParseOptions::default()).unwrap();
    assert_eq!(results.len(), 4);

    for (name, result) in results {
        let dataset = result.unwrap_or_else(|e| panic!("{} failed: {}", name, e));
        match name.as_str() {
            "trees.csv" => {
                assert_eq!(dataset.len(), 2);
                assert_eq!(dataset.metadata.source_srid, Some(4326));
                assert_eq!(dataset.features[0].properties["species"], json!("oak"));
            }
            "zones.geojson" => {
                assert_eq!(dataset.features[0].kind(), GeometryKind::Polygon);
            }
            "scan.xyz" => {
                assert_eq!(dataset.len(), 2);
                assert_eq!(dataset.metadata.source_srid, Some(2056));
            }
            "plan.dxf" => {
                assert_eq!(dataset.features[0].kind(), GeometryKind::LineString);
                assert_eq!(dataset.features[0].properties["layer"], json!("walls"));
                assert_eq!(dataset.metadata.source_srid, Some(2056));
            }
            other => panic!("unexpected file {}", other),
        }
    }
}

#[test]
fn test_unknown_extension_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "notes.docx", b"not geo data");
    let err = Loader::new().resolve(&load(&[path])).unwrap_err();
    assert!(matches!(err, LoaderError::UnsupportedFormat(_)));
}

#[tokio::test]
async fn test_async_parse_reports_progress() {
    let mut text = String::from("x,y,label\n");
    for i in 0..500 {
        text.push_str(&format!("{},{},row{}\n", 2_600_000 + i, 1_200_000 + i, i));
    }
    let files = geo_loader::resolve_one(&[FileRef::new("big.csv", text.into_bytes())]).unwrap();

    let sink = std::sync::Arc::new(ProgressSink::new());
    let mut events = sink.subscribe();
    let options = ParseOptions {
        chunk_size: 1024,
        ..ParseOptions::default()
    };
    let dataset = Loader::new().parse(files, options, sink.clone()).await.unwrap();
    assert_eq!(dataset.len(), 500);

    let mut last = 0.0;
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ProgressEvent::Chunk { progress, .. } => {
                assert!(progress >= last);
                last = progress;
            }
            ProgressEvent::Finished { success, features, .. } => {
                assert!(success);
                assert_eq!(features, 500);
                completed = true;
            }
            _ => {}
        }
    }
    assert!(completed);
    assert!((sink.progress() - 1.0).abs() < f64::EPSILON);
}
