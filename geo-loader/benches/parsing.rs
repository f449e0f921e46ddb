//! Benchmarks des parsers sur des fichiers synthétiques

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo_loader::{resolve_one, CompanionFileSet, FileRef, FormatParser, ParseOptions, Parser, ProgressSink};

fn csv_file(rows: usize) -> CompanionFileSet {
    let mut text = String::from("id,easting,northing,height,label\n");
    for i in 0..rows {
        text.push_str(&format!(
            "{},{:.2},{:.2},{:.1},point {}\n",
            i,
            2_600_000.0 + (i % 1000) as f64 * 1.5,
            1_200_000.0 + (i / 1000) as f64 * 1.5,
            500.0 + (i % 50) as f64,
            i
        ));
    }
    resolve_one(&[FileRef::new("bench.csv", text.into_bytes())]).unwrap_or_else(|e| panic!("{}", e))
}

fn xyz_file(rows: usize) -> CompanionFileSet {
    let mut text = String::new();
    for i in 0..rows {
        text.push_str(&format!(
            "{:.3} {:.3} {:.3} {}\n",
            2_600_000.0 + (i % 1000) as f64 * 0.25,
            1_200_000.0 + (i / 1000) as f64 * 0.25,
            480.0 + (i % 97) as f64 * 0.1,
            i % 256
        ));
    }
    resolve_one(&[FileRef::new("bench.xyz", text.into_bytes())]).unwrap_or_else(|e| panic!("{}", e))
}

fn dxf_file(entities: usize) -> CompanionFileSet {
    let mut text = String::from("0\nSECTION\n2\nENTITIES\n");
    for i in 0..entities {
        let x = 2_600_000.0 + (i % 100) as f64 * 10.0;
        let y = 1_200_000.0 + (i / 100) as f64 * 10.0;
        text.push_str(&format!(
            "0\nLWPOLYLINE\n8\nparcels\n90\n4\n70\n1\n10\n{x}\n20\n{y}\n10\n{}\n20\n{y}\n10\n{}\n20\n{}\n10\n{x}\n20\n{}\n",
            x + 8.0,
            x + 8.0,
            y + 8.0,
            y + 8.0
        ));
    }
    text.push_str("0\nENDSEC\n0\nEOF\n");
    resolve_one(&[FileRef::new("bench.dxf", text.into_bytes())]).unwrap_or_else(|e| panic!("{}", e))
}

fn geojson_file(features: usize) -> CompanionFileSet {
    let items: Vec<String> = (0..features)
        .map(|i| {
            let x = 7.0 + (i % 100) as f64 * 0.01;
            let y = 46.0 + (i / 100) as f64 * 0.01;
            format!(
                r#"{{"type":"Feature","properties":{{"n":{}}},"geometry":{{"type":"LineString","coordinates":[[{},{}],[{},{}]]}}}}"#,
                i,
                x,
                y,
                x + 0.005,
                y + 0.005
            )
        })
        .collect();
    let text = format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, items.join(","));
    resolve_one(&[FileRef::new("bench.geojson", text.into_bytes())]).unwrap_or_else(|e| panic!("{}", e))
}

fn bench_parsers(c: &mut Criterion) {
    let inputs = [
        ("csv", csv_file(20_000)),
        ("xyz", xyz_file(50_000)),
        ("dxf", dxf_file(5_000)),
        ("geojson", geojson_file(5_000)),
    ];

    let mut group = c.benchmark_group("parse");
    for (label, files) in &inputs {
        group.throughput(Throughput::Bytes(files.total_size() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), files, |b, files| {
            let parser = Parser::for_files(files);
            let options = ParseOptions::default();
            b.iter(|| {
                let dataset = parser
                    .parse(black_box(files), &options, &ProgressSink::new())
                    .unwrap_or_else(|e| panic!("{}", e));
                black_box(dataset)
            })
        });
    }
    group.finish();
}

fn bench_reprojection(c: &mut Criterion) {
    let files = csv_file(20_000);
    let options = ParseOptions {
        target_srid: Some(4326),
        ..ParseOptions::default()
    };

    c.bench_function("parse_csv_lv95_to_wgs84", |b| {
        b.iter(|| {
            let dataset = Parser::for_files(&files)
                .parse(black_box(&files), &options, &ProgressSink::new())
                .unwrap_or_else(|e| panic!("{}", e));
            black_box(dataset)
        })
    });
}

fn bench_analyze(c: &mut Criterion) {
    let files = dxf_file(5_000);
    c.bench_function("analyze_dxf", |b| {
        b.iter(|| black_box(Parser::for_files(&files).analyze(black_box(&files)).unwrap_or_else(|e| panic!("{}", e))))
    });
}

criterion_group!(benches, bench_parsers, bench_reprojection, bench_analyze);
criterion_main!(benches);
