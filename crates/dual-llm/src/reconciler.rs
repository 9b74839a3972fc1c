//! Duplicate instance reconciliation.
//!
//! An ambiguous retry can make the server load a second copy of a model that
//! is already loaded. The reconciler spots instances of the same model and
//! unloads all but the first `keep`, in the order the server lists them.
//! During recovery it runs as a short-lived background loop owned by the
//! orchestrator run that started it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::inference::InferenceBackend;
use crate::metrics;
use crate::types::InstanceId;

/// Decides which loaded instance ids belong to a model.
///
/// The `<model><separator><n>` suffix convention is a property of the server
/// version, so the separator is configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMatcher {
    separator: String,
}

impl InstanceMatcher {
    pub fn new(separator: impl Into<String>) -> Self {
        Self { separator: separator.into() }
    }

    pub fn matches(&self, model_name: &str, instance_id: &str) -> bool {
        instance_id == model_name
            || instance_id
                .strip_prefix(model_name)
                .is_some_and(|rest| rest.starts_with(self.separator.as_str()))
    }
}

impl Default for InstanceMatcher {
    fn default() -> Self {
        Self::new(":")
    }
}

/// Lifetime counters for background loops.
#[derive(Debug, Default)]
struct LoopCounters {
    started: AtomicUsize,
    stopped: AtomicUsize,
    active: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcilerStats {
    pub loops_started: usize,
    pub loops_stopped: usize,
    pub loops_active: usize,
}

pub struct DuplicateReconciler {
    backend: Arc<dyn InferenceBackend>,
    matcher: InstanceMatcher,
    interval: Duration,
    counters: Arc<LoopCounters>,
}

impl DuplicateReconciler {
    pub fn new(backend: Arc<dyn InferenceBackend>, matcher: InstanceMatcher, interval: Duration) -> Self {
        Self {
            backend,
            matcher,
            interval,
            counters: Arc::new(LoopCounters::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            loops_started: self.counters.started.load(Ordering::SeqCst),
            loops_stopped: self.counters.stopped.load(Ordering::SeqCst),
            loops_active: self.counters.active.load(Ordering::SeqCst),
        }
    }

    /// Unload every instance of `model_name` beyond the first `keep`.
    ///
    /// Returns the ids the server confirmed unloading; refused unloads are
    /// left for the next pass. A no-op when at most `keep` instances are
    /// loaded, so repeated calls are harmless.
    pub async fn reconcile(&self, model_name: &str, keep: usize) -> Vec<InstanceId> {
        let instances: Vec<InstanceId> = self
            .backend
            .list_loaded()
            .await
            .into_iter()
            .map(|instance| instance.id)
            .filter(|id| self.matcher.matches(model_name, id))
            .collect();

        if instances.len() <= keep {
            debug!("{} has {} instance(s), nothing to reconcile", model_name, instances.len());
            return Vec::new();
        }

        let mut unloaded = Vec::with_capacity(instances.len() - keep);
        for instance in &instances[keep..] {
            info!("Found duplicate instance for {}: {} - unloading", model_name, instance);
            if self.backend.unload(instance).await {
                unloaded.push(instance.clone());
            } else {
                warn!("Duplicate instance {} is still loaded", instance);
            }
        }
        metrics::inc_duplicate_unloads(unloaded.len());
        unloaded
    }

    /// Start polling `reconcile(model_name, 1)` every interval until the
    /// returned handle is stopped or dropped.
    pub fn start_loop(self: &Arc<Self>, model_name: &str) -> ReconcileLoop {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let reconciler = Arc::clone(self);
        let model = model_name.to_string();
        let interval = self.interval;

        self.counters.started.fetch_add(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        metrics::inc_reconcile_loops();
        debug!("Duplicate watcher started for {}", model);

        let active = ActiveGuard(self.counters.clone());
        let handle = tokio::spawn(async move {
            let _active = active;
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                reconciler.reconcile(&model, 1).await;
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Duplicate watcher for {} exited", model);
        });

        ReconcileLoop {
            model_name: model_name.to_string(),
            stop_tx,
            handle: Some(handle),
            counters: self.counters.clone(),
        }
    }
}

/// Marks a loop inactive when its task ends, including by abort.
struct ActiveGuard(Arc<LoopCounters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        metrics::dec_reconcile_loops();
    }
}

/// Handle to a running reconciliation loop.
pub struct ReconcileLoop {
    model_name: String,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<LoopCounters>,
}

impl ReconcileLoop {
    /// Signal the loop and wait for it at most `join_timeout`.
    ///
    /// Returns `false` when the loop had to be aborted because it did not
    /// exit in time.
    pub async fn stop(mut self, join_timeout: Duration) -> bool {
        let _ = self.stop_tx.send(true);
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);

        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout(join_timeout, &mut handle).await {
            Ok(_) => {
                debug!("Duplicate watcher for {} stopped", self.model_name);
                true
            }
            Err(_) => {
                warn!(
                    "Duplicate watcher for {} did not stop within {:?}, aborting",
                    self.model_name, join_timeout
                );
                handle.abort();
                false
            }
        }
    }
}

impl Drop for ReconcileLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(true);
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
            handle.abort();
        }
    }
}
