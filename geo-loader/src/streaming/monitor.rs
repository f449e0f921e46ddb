//! Surveillance périodique de la mémoire
//!
//! Service explicite (`start` / `stop`) : une tâche tokio échantillonne
//! l'usage mémoire à intervalle fixe et notifie les listeners enregistrés.
//! Plusieurs processeurs peuvent s'abonner au même moniteur.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::budget::MemoryBudget;

/// Intervalle d'échantillonnage par défaut
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Seuil d'alerte (fraction de la limite)
pub const WARNING_RATIO: f64 = 0.7;

/// Seuil critique (fraction de la limite)
pub const CRITICAL_RATIO: f64 = 1.0;

/// Niveau de pression mémoire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MemoryPressure {
    #[default]
    Normal,
    Warning,
    /// Demande de collecte : les listeners libèrent leurs caches
    Critical,
}

impl MemoryPressure {
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= CRITICAL_RATIO {
            Self::Critical
        } else if ratio >= WARNING_RATIO {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Warning => 1,
            Self::Critical => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::Warning,
            _ => Self::Critical,
        }
    }
}

/// Source de mesure de l'usage mémoire
pub trait MemorySampler: Send + Sync {
    /// Octets utilisés, ou `None` si la mesure est indisponible
    fn used_bytes(&self) -> Option<usize>;
}

/// Mémoire résidente du processus (`/proc/self/statm`)
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStatmSampler;

const PAGE_SIZE: usize = 4096;

impl MemorySampler for ProcStatmSampler {
    fn used_bytes(&self) -> Option<usize> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident: usize = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident * PAGE_SIZE)
    }
}

/// Somme des budgets enregistrés
#[derive(Debug, Clone, Default)]
pub struct BudgetSampler {
    budgets: Vec<MemoryBudget>,
}

impl BudgetSampler {
    pub fn new(budgets: Vec<MemoryBudget>) -> Self {
        Self { budgets }
    }
}

impl MemorySampler for BudgetSampler {
    fn used_bytes(&self) -> Option<usize> {
        Some(self.budgets.iter().map(MemoryBudget::in_use).sum())
    }
}

/// Reçoit les changements de pression
pub trait MemoryListener: Send + Sync {
    fn on_pressure(&self, pressure: MemoryPressure, used: usize, limit: usize);
}

/// Listener minimal mémorisant la dernière pression observée
///
/// Le `StreamProcessor` le consulte pour suspendre le travail optionnel.
#[derive(Debug, Clone, Default)]
pub struct PressureGate(Arc<AtomicU8>);

impl PressureGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, pressure: MemoryPressure) {
        self.0.store(pressure.to_u8(), Ordering::Release);
    }

    pub fn is_under_pressure(&self) -> bool {
        self.pressure() != MemoryPressure::Normal
    }
}

impl MemoryListener for PressureGate {
    fn on_pressure(&self, pressure: MemoryPressure, _used: usize, _limit: usize) {
        self.set(pressure);
    }
}

/// Configuration du moniteur
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Limite explicite ; à défaut, la somme des budgets enregistrés
    pub limit: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MONITOR_INTERVAL,
            limit: None,
        }
    }
}

type Listeners = Arc<Mutex<Vec<Arc<dyn MemoryListener>>>>;

/// État partagé entre le service et sa tâche
struct PressureCheck {
    sampler: Arc<dyn MemorySampler>,
    fallback: BudgetSampler,
    limit: usize,
    listeners: Listeners,
    state: Arc<watch::Sender<MemoryPressure>>,
}

impl PressureCheck {
    fn check(&self) -> MemoryPressure {
        let used = self
            .sampler
            .used_bytes()
            .or_else(|| self.fallback.used_bytes())
            .unwrap_or(0);
        let pressure = if self.limit == 0 {
            MemoryPressure::Normal
        } else {
            MemoryPressure::from_ratio(used as f64 / self.limit as f64)
        };

        let previous = *self.state.borrow();
        if pressure != previous || pressure == MemoryPressure::Critical {
            match pressure {
                MemoryPressure::Critical => warn!(used, limit = self.limit, "Critical memory pressure"),
                MemoryPressure::Warning => warn!(used, limit = self.limit, "High memory usage"),
                MemoryPressure::Normal => debug!(used, limit = self.limit, "Memory usage back to normal"),
            }
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner()).clone();
            for listener in listeners {
                listener.on_pressure(pressure, used, self.limit);
            }
        }
        self.state.send_replace(pressure);
        pressure
    }
}

/// Moniteur mémoire
pub struct MemoryMonitor {
    config: MonitorConfig,
    sampler: Arc<dyn MemorySampler>,
    budgets: Vec<MemoryBudget>,
    listeners: Listeners,
    state: Arc<watch::Sender<MemoryPressure>>,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl MemoryMonitor {
    /// Moniteur basé sur la mémoire résidente du processus
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_sampler(config, Arc::new(ProcStatmSampler))
    }

    pub fn with_sampler(config: MonitorConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        let (state, _) = watch::channel(MemoryPressure::Normal);
        Self {
            config,
            sampler,
            budgets: Vec::new(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(state),
            shutdown: None,
            handle: None,
        }
    }

    /// Ajoute un budget (sa limite compte dans la limite par défaut)
    pub fn register_budget(&mut self, budget: MemoryBudget) {
        self.budgets.push(budget);
    }

    pub fn add_listener(&self, listener: Arc<dyn MemoryListener>) {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push(listener);
    }

    /// Limite effective
    pub fn limit(&self) -> usize {
        self.config
            .limit
            .unwrap_or_else(|| self.budgets.iter().map(MemoryBudget::limit).sum())
    }

    pub fn pressure(&self) -> MemoryPressure {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MemoryPressure> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn pressure_check(&self) -> PressureCheck {
        PressureCheck {
            sampler: Arc::clone(&self.sampler),
            fallback: BudgetSampler::new(self.budgets.clone()),
            limit: self.limit(),
            listeners: Arc::clone(&self.listeners),
            state: Arc::clone(&self.state),
        }
    }

    /// Échantillonne immédiatement, hors de la tâche périodique
    pub fn check_now(&self) -> MemoryPressure {
        self.pressure_check().check()
    }

    /// Démarre la tâche périodique (sans effet si déjà démarrée)
    ///
    /// Doit être appelé dans un runtime tokio.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let pressure = self.pressure_check();
        let interval = self.config.interval;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(interval_ms = interval.as_millis() as u64, limit = pressure.limit, "Memory monitor started");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pressure.check();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Memory monitor task exited");
        });

        self.shutdown = Some(shutdown_tx);
        self.handle = Some(handle);
    }

    /// Arrête la tâche et rend son handle à l'appelant
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        let handle = self.handle.take();
        if handle.is_some() {
            info!("Memory monitor stopped");
        }
        handle
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.stop() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FixedSampler(AtomicUsize);

    impl MemorySampler for FixedSampler {
        fn used_bytes(&self) -> Option<usize> {
            Some(self.0.load(Ordering::SeqCst))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<MemoryPressure>>);

    impl MemoryListener for Recorder {
        fn on_pressure(&self, pressure: MemoryPressure, _used: usize, _limit: usize) {
            self.0.lock().unwrap().push(pressure);
        }
    }

    fn monitor(used: usize) -> (MemoryMonitor, Arc<FixedSampler>) {
        let sampler = Arc::new(FixedSampler(AtomicUsize::new(used)));
        let config = MonitorConfig {
            interval: Duration::from_millis(10),
            limit: Some(1_000),
        };
        (MemoryMonitor::with_sampler(config, sampler.clone()), sampler)
    }

    #[test]
    fn test_thresholds() {
        let (monitor, sampler) = monitor(100);
        let recorder = Arc::new(Recorder::default());
        let gate = PressureGate::new();
        monitor.add_listener(recorder.clone());
        monitor.add_listener(Arc::new(gate.clone()));

        assert_eq!(monitor.check_now(), MemoryPressure::Normal);
        sampler.0.store(700, Ordering::SeqCst);
        assert_eq!(monitor.check_now(), MemoryPressure::Warning);
        assert!(gate.is_under_pressure());
        sampler.0.store(1_200, Ordering::SeqCst);
        assert_eq!(monitor.check_now(), MemoryPressure::Critical);
        sampler.0.store(10, Ordering::SeqCst);
        assert_eq!(monitor.check_now(), MemoryPressure::Normal);
        assert!(!gate.is_under_pressure());

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![MemoryPressure::Warning, MemoryPressure::Critical, MemoryPressure::Normal]
        );
    }

    #[test]
    fn test_limit_defaults_to_budget_total() {
        let mut monitor = MemoryMonitor::new(MonitorConfig::default());
        monitor.register_budget(MemoryBudget::new(100));
        monitor.register_budget(MemoryBudget::new(50));
        assert_eq!(monitor.limit(), 150);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (mut monitor, _sampler) = monitor(800);
        let mut rx = monitor.subscribe();
        monitor.start();
        assert!(monitor.is_running());

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), MemoryPressure::Warning);

        let handle = monitor.stop().expect("task handle");
        handle.await.unwrap();
        assert!(!monitor.is_running());
        assert!(monitor.stop().is_none());
    }
}
