//! Budget mémoire partagé et admission avec attente bornée
//!
//! Le compteur est un `AtomicUsize` : `admit` l'incrémente par
//! compare-exchange uniquement s'il reste de la marge, la `Reservation`
//! retournée le décrémente à sa destruction. Faute de marge, les fonctions
//! de libération enregistrées (caches de buffers) sont sollicitées avant
//! toute attente.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{LoaderError, Result};

/// Budget par défaut (256 Mio)
pub const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Nombre de tentatives d'admission avant abandon
pub const ADMIT_RETRIES: u32 = 5;

/// Attente exponentielle plafonnée
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    /// Politique d'admission mémoire : 10 ms, x2, plafond 200 ms
    pub const ADMISSION: Backoff = Backoff {
        base: Duration::from_millis(10),
        factor: 2,
        cap: Duration::from_millis(200),
        max_attempts: ADMIT_RETRIES,
    };

    /// Délai avant la tentative `attempt` (0 = première relance)
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt.min(16));
        self.base.saturating_mul(multiplier).min(self.cap)
    }

    /// Indique si une nouvelle tentative est permise après `failures` échecs
    pub fn allows(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

/// Fonction de libération : reçoit le nombre d'octets manquants,
/// retourne le nombre d'octets effectivement libérés
pub type ReleaseHook = Arc<dyn Fn(usize) -> usize + Send + Sync>;

struct BudgetInner {
    limit: usize,
    used: AtomicUsize,
    release_hooks: Mutex<Vec<(u64, ReleaseHook)>>,
    next_hook: AtomicU64,
}

/// Retire la fonction de libération du budget à sa destruction
#[must_use = "the release hook is removed as soon as the guard is dropped"]
pub struct ReleaseHookGuard {
    inner: Weak<BudgetInner>,
    id: u64,
}

impl std::fmt::Debug for ReleaseHookGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseHookGuard").field("id", &self.id).finish()
    }
}

impl Drop for ReleaseHookGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut hooks = inner.release_hooks.lock().unwrap_or_else(|e| e.into_inner());
            hooks.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Budget mémoire clonable (les clones partagent le même compteur)
#[derive(Clone)]
pub struct MemoryBudget {
    inner: Arc<BudgetInner>,
    backoff: Backoff,
}

impl std::fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("limit", &self.inner.limit)
            .field("used", &self.in_use())
            .finish()
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limit,
                used: AtomicUsize::new(0),
                release_hooks: Mutex::new(Vec::new()),
                next_hook: AtomicU64::new(0),
            }),
            backoff: Backoff::ADMISSION,
        }
    }

    /// Remplace la politique d'attente (tests, configuration)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn in_use(&self) -> usize {
        self.inner.used.load(Ordering::Acquire)
    }

    pub fn headroom(&self) -> usize {
        self.limit().saturating_sub(self.in_use())
    }

    /// Enregistre une fonction appelée pour libérer des buffers avant d'attendre
    ///
    /// Plusieurs parsings partageant le budget peuvent chacun en enregistrer
    /// une ; elles sont sollicitées dans l'ordre d'enregistrement.
    pub fn add_release_hook(&self, hook: impl Fn(usize) -> usize + Send + Sync + 'static) -> ReleaseHookGuard {
        let id = self.inner.next_hook.fetch_add(1, Ordering::Relaxed);
        let mut hooks = self.inner.release_hooks.lock().unwrap_or_else(|e| e.into_inner());
        hooks.push((id, Arc::new(hook)));
        ReleaseHookGuard {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn release_hooks(&self) -> Vec<ReleaseHook> {
        let hooks = self.inner.release_hooks.lock().unwrap_or_else(|e| e.into_inner());
        hooks.iter().map(|(_, hook)| Arc::clone(hook)).collect()
    }

    /// Sollicite les fonctions de libération jusqu'à couvrir `bytes`
    fn release_for(&self, bytes: usize) {
        for hook in self.release_hooks() {
            let needed = bytes.saturating_sub(self.headroom());
            if needed == 0 {
                break;
            }
            let freed = hook(needed);
            debug!(needed, freed, "Release hook invoked");
        }
    }

    /// Tente une réservation sans attendre
    pub fn try_admit(&self, bytes: usize) -> Option<Reservation> {
        let used = &self.inner.used;
        let mut current = used.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(bytes)?;
            if next > self.inner.limit {
                return None;
            }
            match used.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Some(Reservation {
                        inner: Arc::clone(&self.inner),
                        bytes,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Réserve `bytes` octets, en demandant une libération puis en attendant
    ///
    /// Bloque le thread courant pendant l'attente : à appeler depuis un
    /// thread de parsing (`spawn_blocking`), jamais depuis une tâche async.
    pub fn admit(&self, bytes: usize) -> Result<Reservation> {
        if let Some(reservation) = self.try_admit(bytes) {
            return Ok(reservation);
        }

        let mut failures = 0;
        loop {
            self.release_for(bytes);
            if let Some(reservation) = self.try_admit(bytes) {
                return Ok(reservation);
            }
            if !self.backoff.allows(failures) {
                break;
            }
            std::thread::sleep(self.backoff.delay(failures));
            failures += 1;
        }

        warn!(
            requested = bytes,
            in_use = self.in_use(),
            budget = self.limit(),
            "Memory budget exhausted"
        );
        Err(LoaderError::MemoryBudgetExhausted {
            requested: bytes,
            in_use: self.in_use(),
            budget: self.limit(),
            attempts: failures + 1,
        })
    }
}

/// Réservation RAII : libère ses octets à la destruction
#[must_use = "the reservation is released as soon as it is dropped"]
pub struct Reservation {
    inner: Arc<BudgetInner>,
    bytes: usize,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation").field("bytes", &self.bytes).finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.inner.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}
