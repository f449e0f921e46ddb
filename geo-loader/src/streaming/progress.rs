//! Événements de progression et annulation coopérative

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::bounds::Bounds;
use crate::types::CanonicalFeature;

/// Événement émis pendant un parsing
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Début du traitement d'un fichier
    Started { file: String, total_bytes: usize },
    /// Un chunk a été converti
    Chunk {
        /// Features du chunk (ids définitifs)
        features: Arc<[CanonicalFeature]>,
        /// Emprise cumulée depuis le début du fichier
        bounds: Option<Bounds>,
        /// Nombre total de features émises jusqu'ici
        total_features: usize,
        progress: f64,
    },
    /// Fin du traitement (toujours émis, même en cas d'erreur)
    Finished {
        features: usize,
        progress: f64,
        success: bool,
    },
}

/// Diffuse les événements vers une liste d'observateurs
///
/// Les observateurs dont le récepteur a été abandonné sont retirés ; si tous
/// les observateurs abandonnent, le parsing en cours s'arrête au chunk suivant.
#[derive(Debug, Default)]
pub struct ProgressSink {
    observers: Mutex<Vec<UnboundedSender<ProgressEvent>>>,
    had_observers: AtomicBool,
    /// Dernière progression émise (bits d'un f64)
    last_progress: AtomicU64,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute un observateur
    pub fn subscribe(&self) -> UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = unbounded_channel();
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        self.had_observers.store(true, Ordering::Release);
        rx
    }

    /// Dernière progression émise
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.last_progress.load(Ordering::Acquire))
    }

    /// Rend la progression monotone et bornée à [0, 1]
    fn monotonic(&self, progress: f64) -> f64 {
        let clamped = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };
        let previous = self.progress();
        let value = clamped.max(previous);
        self.last_progress.store(value.to_bits(), Ordering::Release);
        value
    }

    /// Réinitialise la progression pour un nouveau parsing
    pub fn reset(&self) {
        self.last_progress.store(0.0_f64.to_bits(), Ordering::Release);
    }

    /// Émet un événement vers tous les observateurs encore présents
    pub fn emit(&self, event: ProgressEvent) {
        let event = match event {
            ProgressEvent::Chunk {
                features,
                bounds,
                total_features,
                progress,
            } => ProgressEvent::Chunk {
                features,
                bounds,
                total_features,
                progress: self.monotonic(progress),
            },
            ProgressEvent::Finished {
                features,
                progress,
                success,
            } => ProgressEvent::Finished {
                features,
                progress: self.monotonic(progress),
                success,
            },
            other => other,
        };

        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Vrai si au moins un observateur écoute encore
    pub fn has_observers(&self) -> bool {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|tx| !tx.is_closed())
    }

    /// Vrai si des observateurs ont existé et qu'ils sont tous partis
    pub fn is_abandoned(&self) -> bool {
        self.had_observers.load(Ordering::Acquire)
            && self
                .observers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .all(|tx| tx.is_closed())
    }
}

/// Jeton d'annulation partagé
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
