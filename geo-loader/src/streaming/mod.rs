//! Framework de traitement par chunks
//!
//! Les parsers exposent un [`ChunkProducer`] ; le [`StreamProcessor`] le
//! pilote : admission mémoire avant chaque chunk, attribution des ids,
//! cumul de l'emprise et des statistiques, plafond de features, annulation
//! coopérative et émission des événements de progression. Les buffers
//! remis aux observateurs restent comptés dans le budget jusqu'à ce qu'une
//! admission les évince.

pub mod budget;
pub mod cache;
pub mod chunk;
pub mod monitor;
pub mod progress;

pub use budget::{Backoff, MemoryBudget, ReleaseHookGuard, Reservation, ADMIT_RETRIES, DEFAULT_MEMORY_BUDGET};
pub use cache::ChunkCache;
pub use chunk::{decode_text, read_binary, ChunkReader, DEFAULT_TEXT_CHUNK_SIZE, MAX_BINARY_READ};
pub use monitor::{
    BudgetSampler, MemoryListener, MemoryMonitor, MemoryPressure, MemorySampler, MonitorConfig, PressureGate,
    ProcStatmSampler,
};
pub use progress::{CancelToken, ProgressEvent, ProgressSink};

use std::sync::Arc;

use geo::{Area, Coord, Geometry, LineString, Polygon};
use tracing::{debug, info};

use crate::bounds::{Bounds, BoundsAccumulator};
use crate::error::{LoaderError, Result};
use crate::parsers::ParseOptions;
use crate::stats::ProcessorStats;
use crate::types::CanonicalFeature;

/// Résultat de la conversion d'un chunk
#[derive(Debug, Default)]
pub struct Chunk {
    /// Features converties (les ids sont réattribués par le processeur)
    pub features: Vec<CanonicalFeature>,
    /// Erreurs non fatales du chunk
    pub stats: ProcessorStats,
    /// Progression de la source après ce chunk, dans [0, 1]
    pub progress: f64,
}

/// Source de chunks (un par format)
pub trait ChunkProducer {
    /// Taille totale de la source en octets
    fn total_bytes(&self) -> usize;

    /// Estimation de la mémoire nécessaire au prochain chunk
    fn next_chunk_size(&self) -> usize;

    /// Convertit le chunk suivant, `None` en fin de source
    fn next_chunk(&mut self) -> Result<Option<Chunk>>;
}

/// Résultat cumulé d'un passage complet
#[derive(Debug, Default)]
pub struct StreamOutput {
    pub features: Vec<CanonicalFeature>,
    pub stats: ProcessorStats,
    pub bounds: BoundsAccumulator,
    /// Vrai si `max_features` a interrompu la lecture
    pub truncated: bool,
}

/// Garde de flux : émet `Finished` même sur retour anticipé
struct StreamGuard<'a> {
    sink: &'a ProgressSink,
    features: usize,
    finished: bool,
}

impl<'a> StreamGuard<'a> {
    fn start(sink: &'a ProgressSink, file: &str, total_bytes: usize) -> Self {
        sink.reset();
        sink.emit(ProgressEvent::Started {
            file: file.to_string(),
            total_bytes,
        });
        Self {
            sink,
            features: 0,
            finished: false,
        }
    }

    fn chunk(&mut self, converted: usize, features: Arc<[CanonicalFeature]>, bounds: Option<Bounds>, progress: f64) {
        self.features += converted;
        self.sink.emit(ProgressEvent::Chunk {
            features,
            bounds,
            total_features: self.features,
            progress,
        });
    }

    fn finish(mut self) {
        self.finished = true;
        self.sink.emit(ProgressEvent::Finished {
            features: self.features,
            progress: 1.0,
            success: true,
        });
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.sink.emit(ProgressEvent::Finished {
                features: self.features,
                progress: self.sink.progress(),
                success: false,
            });
        }
    }
}

/// Pilote d'un `ChunkProducer`
pub struct StreamProcessor<'a> {
    file: &'a str,
    options: &'a ParseOptions,
    sink: &'a ProgressSink,
}

impl<'a> StreamProcessor<'a> {
    pub fn new(file: &'a str, options: &'a ParseOptions, sink: &'a ProgressSink) -> Self {
        Self { file, options, sink }
    }

    fn cap_reached(&self, count: usize) -> bool {
        self.options.max_features.is_some_and(|max| count >= max)
    }

    /// Consomme le producteur jusqu'à la fin (ou au plafond de features)
    pub fn run<P: ChunkProducer>(&self, producer: &mut P) -> Result<StreamOutput> {
        let mut guard = StreamGuard::start(self.sink, self.file, producer.total_bytes());
        let mut out = StreamOutput::default();
        let mut chunks = 0usize;
        let cache = ChunkCache::new();
        let _hook = self.options.memory.as_ref().map(|budget| cache.register(budget));

        loop {
            if self.options.cancel.is_cancelled() || self.sink.is_abandoned() {
                info!(file = self.file, features = out.features.len(), "Parse cancelled");
                return Err(LoaderError::Cancelled(self.file.to_string()));
            }

            let reservation = match &self.options.memory {
                Some(budget) => Some(budget.admit(producer.next_chunk_size().max(1))?),
                None => None,
            };

            let Some(chunk) = producer.next_chunk()? else {
                break;
            };
            chunks += 1;

            let optional_work = !self.options.pressure.is_under_pressure();
            let first = out.features.len();

            for mut feature in chunk.features {
                if self.cap_reached(out.features.len()) {
                    out.truncated = true;
                    break;
                }
                feature.id = out.features.len() as u64;
                if optional_work {
                    annotate_validity(&mut feature);
                }
                out.bounds.add_geometry(&feature.geometry);
                out.stats.record_feature(feature.kind());
                out.features.push(feature);
            }
            out.stats.merge(chunk.stats);

            // Copie pour les observateurs seulement, comptée dans le budget
            let emitted: Arc<[CanonicalFeature]> = if self.sink.has_observers() {
                out.features[first..].iter().cloned().collect()
            } else {
                Arc::from(Vec::new())
            };
            if let Some(reservation) = reservation {
                if !emitted.is_empty() {
                    cache.retain(Arc::clone(&emitted), reservation);
                }
            }
            guard.chunk(out.features.len() - first, emitted, out.bounds.current(), chunk.progress);

            if out.truncated || self.cap_reached(out.features.len()) {
                out.truncated = true;
                break;
            }
        }

        debug!(
            file = self.file,
            chunks,
            retained_chunks = cache.len(),
            features = out.features.len(),
            issues = out.stats.issue_count(),
            "Stream finished"
        );
        guard.finish();
        Ok(out)
    }
}

/// Lit des chunks jusqu'à obtenir `limit` features (aperçu structurel)
pub fn collect_sample<P: ChunkProducer>(producer: &mut P, limit: usize) -> Result<StreamOutput> {
    let mut out = StreamOutput::default();
    while out.features.len() < limit {
        let Some(chunk) = producer.next_chunk()? else {
            break;
        };
        for mut feature in chunk.features {
            if out.features.len() >= limit {
                out.truncated = true;
                break;
            }
            feature.id = out.features.len() as u64;
            out.bounds.add_geometry(&feature.geometry);
            out.stats.record_feature(feature.kind());
            out.features.push(feature);
        }
        out.stats.merge(chunk.stats);
    }
    Ok(out)
}

/// Signale (sans réparer) les géométries dégénérées ou auto-tangentes
pub fn annotate_validity(feature: &mut CanonicalFeature) {
    let mut degenerate = false;
    let mut self_touching = false;
    inspect(&feature.geometry, &mut degenerate, &mut self_touching);
    feature.flags.degenerate |= degenerate;
    feature.flags.self_touching |= self_touching;
}

fn has_repeated_vertex(ring: &LineString) -> bool {
    ring.0.windows(2).any(|w| w[0] == w[1])
}

fn is_collapsed(line: &LineString) -> bool {
    let first: Option<&Coord> = line.0.first();
    first.map_or(true, |first| line.0.iter().all(|c| c == first))
}

fn inspect_polygon(polygon: &Polygon, degenerate: &mut bool, self_touching: &mut bool) {
    if polygon.unsigned_area() == 0.0 {
        *degenerate = true;
    }
    if std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .any(has_repeated_vertex)
    {
        *self_touching = true;
    }
}

fn inspect(geometry: &Geometry, degenerate: &mut bool, self_touching: &mut bool) {
    match geometry {
        Geometry::LineString(ls) => *degenerate |= is_collapsed(ls),
        Geometry::MultiLineString(mls) => *degenerate |= mls.iter().any(is_collapsed),
        Geometry::Polygon(p) => inspect_polygon(p, degenerate, self_touching),
        Geometry::MultiPolygon(mp) => {
            for p in mp.iter() {
                inspect_polygon(p, degenerate, self_touching);
            }
        }
        Geometry::GeometryCollection(gc) => {
            for member in gc.iter() {
                inspect(member, degenerate, self_touching);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;
    use geo::{line_string, point, polygon};
    use serde_json::json;

    /// Producteur de test : `chunks` chunks de `per_chunk` points
    struct Points {
        remaining: usize,
        per_chunk: usize,
        total: usize,
    }

    impl Points {
        fn new(chunks: usize, per_chunk: usize) -> Self {
            Self {
                remaining: chunks,
                per_chunk,
                total: chunks,
            }
        }
    }

    impl ChunkProducer for Points {
        fn total_bytes(&self) -> usize {
            self.total * 100
        }

        fn next_chunk_size(&self) -> usize {
            100
        }

        fn next_chunk(&mut self) -> Result<Option<Chunk>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            let done = self.total - self.remaining;
            let features = (0..self.per_chunk)
                .map(|i| CanonicalFeature::new(99, point!(x: i as f64, y: done as f64).into(), Properties::new()))
                .collect();
            let mut stats = ProcessorStats::new();
            stats.issue(crate::stats::IssueKind::InvalidCoordinates, "row skipped", json!(null));
            Ok(Some(Chunk {
                features,
                stats,
                progress: done as f64 / self.total as f64,
            }))
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_run_assigns_ids_and_reports_progress() {
        let options = ParseOptions::default();
        let sink = ProgressSink::new();
        let mut rx = sink.subscribe();

        let out = StreamProcessor::new("points", &options, &sink)
            .run(&mut Points::new(3, 2))
            .unwrap();

        let ids: Vec<u64> = out.features.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(out.stats.feature_count, 6);
        assert_eq!(out.stats.issue_count(), 3);
        assert_eq!(out.bounds.current().unwrap().to_array(), [0.0, 1.0, 1.0, 3.0]);

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Finished {
                features: 6,
                progress: 1.0,
                success: true
            })
        );
    }

    #[test]
    fn test_chunk_events_carry_features_and_running_bounds() {
        let options = ParseOptions::default();
        let sink = ProgressSink::new();
        let mut rx = sink.subscribe();
        StreamProcessor::new("points", &options, &sink)
            .run(&mut Points::new(2, 2))
            .unwrap();

        let chunks: Vec<(Vec<u64>, [f64; 4], usize)> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Chunk {
                    features,
                    bounds,
                    total_features,
                    ..
                } => Some((features.iter().map(|f| f.id).collect(), bounds?.to_array(), total_features)),
                _ => None,
            })
            .collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], (vec![0, 1], [0.0, 1.0, 1.0, 1.0], 2));
        // Emprise du second chunk fusionnée avec la première
        assert_eq!(chunks[1], (vec![2, 3], [0.0, 1.0, 1.0, 2.0], 4));
    }

    #[test]
    fn test_observed_buffers_are_evicted_for_admission() {
        // Assez pour deux chunks : chaque admission doit évincer un buffer déjà émis
        let budget = MemoryBudget::new(200).with_backoff(Backoff {
            base: std::time::Duration::from_millis(1),
            factor: 2,
            cap: std::time::Duration::from_millis(1),
            max_attempts: 1,
        });
        let options = ParseOptions {
            memory: Some(budget.clone()),
            ..ParseOptions::default()
        };
        let sink = ProgressSink::new();
        let mut rx = sink.subscribe();

        let out = StreamProcessor::new("points", &options, &sink)
            .run(&mut Points::new(6, 1))
            .unwrap();
        assert_eq!(out.features.len(), 6);
        assert_eq!(budget.in_use(), 0);

        let emitted: usize = drain(&mut rx)
            .iter()
            .map(|event| match event {
                ProgressEvent::Chunk { features, .. } => features.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(emitted, 6);
    }

    #[test]
    fn test_max_features_cap() {
        let options = ParseOptions {
            max_features: Some(3),
            ..ParseOptions::default()
        };
        let sink = ProgressSink::new();
        let out = StreamProcessor::new("points", &options, &sink)
            .run(&mut Points::new(10, 2))
            .unwrap();
        assert_eq!(out.features.len(), 3);
        assert!(out.truncated);
    }

    #[test]
    fn test_cancel_emits_final_event() {
        let options = ParseOptions::default();
        options.cancel.cancel();
        let sink = ProgressSink::new();
        let mut rx = sink.subscribe();

        let err = StreamProcessor::new("points", &options, &sink)
            .run(&mut Points::new(2, 1))
            .unwrap_err();
        assert!(matches!(err, LoaderError::Cancelled(_)));
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ProgressEvent::Finished { success: false, .. })
        ));
    }

    #[test]
    fn test_budget_is_released_between_chunks() {
        let budget = MemoryBudget::new(150);
        let options = ParseOptions {
            memory: Some(budget.clone()),
            ..ParseOptions::default()
        };
        let sink = ProgressSink::new();
        let out = StreamProcessor::new("points", &options, &sink)
            .run(&mut Points::new(5, 1))
            .unwrap();
        assert_eq!(out.features.len(), 5);
        assert_eq!(budget.in_use(), 0);
    }

    #[test]
    fn test_optional_validation_paused_under_pressure() {
        let gate = PressureGate::new();
        gate.set(MemoryPressure::Warning);
        let options = ParseOptions {
            pressure: gate,
            ..ParseOptions::default()
        };

        struct Flat(bool);
        impl ChunkProducer for Flat {
            fn total_bytes(&self) -> usize {
                1
            }
            fn next_chunk_size(&self) -> usize {
                1
            }
            fn next_chunk(&mut self) -> Result<Option<Chunk>> {
                if std::mem::replace(&mut self.0, true) {
                    return Ok(None);
                }
                let flat = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 0.0)];
                Ok(Some(Chunk {
                    features: vec![CanonicalFeature::new(0, flat.into(), Properties::new())],
                    stats: ProcessorStats::new(),
                    progress: 1.0,
                }))
            }
        }

        let sink = ProgressSink::new();
        let out = StreamProcessor::new("flat", &options, &sink).run(&mut Flat(false)).unwrap();
        assert!(!out.features[0].flags.degenerate);
    }

    #[test]
    fn test_annotate_validity() {
        let mut flat = CanonicalFeature::new(
            0,
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 0.0), (x: 0.0, y: 0.0)].into(),
            Properties::new(),
        );
        annotate_validity(&mut flat);
        assert!(flat.flags.degenerate);
        assert!(flat.flags.self_touching);

        let mut line = CanonicalFeature::new(
            1,
            line_string![(x: 0.0, y: 0.0), (x: 3.0, y: 4.0)].into(),
            Properties::new(),
        );
        annotate_validity(&mut line);
        assert!(line.flags.is_empty());
    }

    #[test]
    fn test_collect_sample_stops_at_limit() {
        let out = collect_sample(&mut Points::new(10, 4), 6).unwrap();
        assert_eq!(out.features.len(), 6);
        assert!(out.truncated);
    }
}
