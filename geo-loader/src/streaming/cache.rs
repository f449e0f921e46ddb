//! Buffers de chunks partagés avec les observateurs
//!
//! Chaque buffer émis garde la réservation mémoire de son chunk tant qu'il
//! reste dans le cache. Quand une admission manque de marge, les buffers les
//! moins récemment utiles (les plus anciens) sont libérés en premier.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::budget::{MemoryBudget, ReleaseHookGuard, Reservation};
use crate::types::CanonicalFeature;

struct CachedChunk {
    features: Arc<[CanonicalFeature]>,
    reservation: Reservation,
}

/// File LRU de buffers de chunks, libérable par le budget
#[derive(Default)]
pub struct ChunkCache {
    entries: Mutex<VecDeque<CachedChunk>>,
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("chunks", &self.len())
            .field("bytes", &self.retained_bytes())
            .finish()
    }
}

impl ChunkCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Branche le cache sur le budget ; retiré quand la garde est détruite
    pub fn register(self: &Arc<Self>, budget: &MemoryBudget) -> ReleaseHookGuard {
        let cache = Arc::downgrade(self);
        budget.add_release_hook(move |needed| cache.upgrade().map_or(0, |cache| cache.release(needed)))
    }

    /// Conserve un buffer avec la réservation qui le couvre
    pub fn retain(&self, features: Arc<[CanonicalFeature]>, reservation: Reservation) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(CachedChunk { features, reservation });
    }

    /// Libère les plus anciens buffers jusqu'à couvrir `needed` octets
    pub fn release(&self, needed: usize) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut freed = 0;
        while freed < needed {
            let Some(entry) = entries.pop_front() else {
                break;
            };
            freed += entry.reservation.bytes();
            trace!(features = entry.features.len(), bytes = entry.reservation.bytes(), "Chunk buffer released");
        }
        freed
    }

    /// Buffers encore présents, du plus ancien au plus récent
    pub fn chunks(&self) -> Vec<Arc<[CanonicalFeature]>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|entry| Arc::clone(&entry.features)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retained_bytes(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|entry| entry.reservation.bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;
    use geo::point;

    fn buffer(id: u64) -> Arc<[CanonicalFeature]> {
        vec![CanonicalFeature::new(id, point!(x: 1.0, y: 2.0).into(), Properties::new())].into()
    }

    #[test]
    fn test_oldest_buffers_released_first() {
        let budget = MemoryBudget::new(100);
        let cache = ChunkCache::new();
        for id in 0..3 {
            cache.retain(buffer(id), budget.try_admit(30).unwrap());
        }
        assert_eq!(budget.in_use(), 90);

        assert_eq!(cache.release(40), 60);
        assert_eq!(budget.in_use(), 30);
        let left = cache.chunks();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0][0].id, 2);
    }

    #[test]
    fn test_registered_cache_makes_room_for_admission() {
        let budget = MemoryBudget::new(100);
        let cache = ChunkCache::new();
        let hook = cache.register(&budget);
        cache.retain(buffer(0), budget.try_admit(50).unwrap());
        cache.retain(buffer(1), budget.try_admit(40).unwrap());

        let reservation = budget.admit(30).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(budget.in_use(), 70);

        drop(reservation);
        drop(hook);
        drop(cache);
        assert_eq!(budget.in_use(), 0);
    }
}
