//! Fans one prompt out to every side.
//!
//! Each side runs end to end in its own task; the dispatcher merges nothing.
//! Model selection per side lives in a lock-free swappable slot so the caller
//! can change it at any time without blocking in-flight runs.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::inference::InferenceBackend;
use crate::orchestrator::GenerationOrchestrator;
use crate::reconciler::{DuplicateReconciler, InstanceMatcher};
use crate::registry::ModelRegistry;
use crate::types::{GenerationRequest, GenerationResult, ModelName, Side};

/// Receives one side's terminal result, exactly once.
pub type ResultSink = Box<dyn FnOnce(GenerationResult) + Send + 'static>;

/// Sink forwarding results into a channel, for callers that prefer to poll.
pub fn channel_sink(sender: mpsc::UnboundedSender<GenerationResult>) -> ResultSink {
    Box::new(move |result| {
        let _ = sender.send(result);
    })
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Please enter a prompt")]
    EmptyPrompt,

    #[error("a generation is already running on the {0} side")]
    SideBusy(Side),

    #[error("no model name given for the {0} side")]
    EmptyModelName(Side),
}

/// Holds a side's in-flight flag; released on drop, so a panicking run
/// never wedges its side.
struct InFlightClaim {
    side: Side,
    flag: Arc<AtomicBool>,
}

impl InFlightClaim {
    fn try_claim(side: Side, flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                side,
                flag: flag.clone(),
            })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        debug!("[{}] side released", self.side);
    }
}

/// Tasks started by one `run`. Awaiting is optional; results go to the sinks
/// regardless.
#[derive(Debug)]
pub struct DispatchHandle {
    tasks: Vec<(Side, JoinHandle<()>)>,
}

impl DispatchHandle {
    pub fn sides(&self) -> Vec<Side> {
        self.tasks.iter().map(|(side, _)| *side).collect()
    }

    /// Wait until every side has delivered its result.
    pub async fn join(self) {
        let (sides, handles): (Vec<Side>, Vec<JoinHandle<()>>) = self.tasks.into_iter().unzip();
        let outcomes = futures::future::join_all(handles).await;
        for (side, outcome) in sides.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                error!("[{}] generation task did not finish cleanly: {}", side, e);
            }
        }
    }
}

pub struct Dispatcher {
    orchestrator: Arc<GenerationOrchestrator>,
    selections: HashMap<Side, ArcSwap<ModelName>>,
    in_flight: HashMap<Side, Arc<AtomicBool>>,
    available_models: Vec<ModelName>,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Arc<GenerationOrchestrator>,
        default_model: impl Fn(Side) -> ModelName,
        available_models: Vec<ModelName>,
    ) -> Self {
        let selections = Side::ALL
            .iter()
            .map(|&side| (side, ArcSwap::from_pointee(default_model(side))))
            .collect();
        let in_flight = Side::ALL
            .iter()
            .map(|&side| (side, Arc::new(AtomicBool::new(false))))
            .collect();

        Self {
            orchestrator,
            selections,
            in_flight,
            available_models,
        }
    }

    /// Wire registry, reconciler and orchestrator around `backend`.
    pub fn from_config(config: &Config, backend: Arc<dyn InferenceBackend>) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let reconciler = Arc::new(DuplicateReconciler::new(
            backend.clone(),
            InstanceMatcher::new(config.instance_separator.clone()),
            config.reconcile_interval(),
        ));
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            backend,
            registry,
            reconciler,
            config.reconcile_join_timeout(),
        ));

        Self::new(
            orchestrator,
            |side| config.default_model(side).to_string(),
            config.available_models.clone(),
        )
    }

    pub fn orchestrator(&self) -> &Arc<GenerationOrchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.orchestrator.registry()
    }

    pub fn available_models(&self) -> &[ModelName] {
        &self.available_models
    }

    /// Change which model the next run targets on `side`.
    pub fn select_model(&self, side: Side, model_name: &str) -> Result<(), DispatchError> {
        let model_name = model_name.trim();
        if model_name.is_empty() {
            return Err(DispatchError::EmptyModelName(side));
        }
        if let Some(slot) = self.selections.get(&side) {
            let current = slot.load();
            if **current != model_name {
                info!("[{}] model selection {} → {}", side, **current, model_name);
                slot.store(Arc::new(model_name.to_string()));
            }
        }
        Ok(())
    }

    pub fn selected_model(&self, side: Side) -> ModelName {
        self.selections
            .get(&side)
            .map(|slot| (**slot.load()).clone())
            .unwrap_or_default()
    }

    pub fn is_busy(&self, side: Side) -> bool {
        self.in_flight
            .get(&side)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Select both models, then `run`.
    ///
    /// Selections are only changed once the prompt and both names are valid
    /// and no side is busy.
    pub fn submit<F>(
        &self,
        prompt_text: &str,
        left_model: &str,
        right_model: &str,
        sink_for: F,
    ) -> Result<DispatchHandle, DispatchError>
    where
        F: FnMut(Side) -> ResultSink,
    {
        if prompt_text.trim().is_empty() {
            return Err(DispatchError::EmptyPrompt);
        }
        let choices = [(Side::Left, left_model.trim()), (Side::Right, right_model.trim())];
        for (side, model_name) in choices {
            if model_name.is_empty() {
                return Err(DispatchError::EmptyModelName(side));
            }
        }
        if let Some(side) = Side::ALL.into_iter().find(|&side| self.is_busy(side)) {
            return Err(DispatchError::SideBusy(side));
        }

        for (side, model_name) in choices {
            self.select_model(side, model_name)?;
        }
        self.run(prompt_text, sink_for)
    }

    /// Start one orchestrator run per side and return without waiting.
    ///
    /// Fails without starting anything when the prompt is blank or any side
    /// still has a run in flight. Must be called inside a Tokio runtime.
    pub fn run<F>(&self, prompt_text: &str, mut sink_for: F) -> Result<DispatchHandle, DispatchError>
    where
        F: FnMut(Side) -> ResultSink,
    {
        let prompt = prompt_text.trim();
        if prompt.is_empty() {
            return Err(DispatchError::EmptyPrompt);
        }

        let mut claims = Vec::with_capacity(Side::ALL.len());
        for side in Side::ALL {
            let claim = self
                .in_flight
                .get(&side)
                .and_then(|flag| InFlightClaim::try_claim(side, flag))
                .ok_or(DispatchError::SideBusy(side))?;
            claims.push(claim);
        }

        let mut tasks = Vec::with_capacity(claims.len());
        for claim in claims {
            let side = claim.side;
            let model_name = self.selected_model(side);
            // Read here, before the worker exists, so the run sees the
            // registry as of dispatch time.
            let expected_instance_id = self.registry().expected_instance(side, &model_name);
            let request = GenerationRequest {
                side,
                model_name,
                prompt_text: prompt.to_string(),
                expected_instance_id,
            };
            let sink = sink_for(side);
            let orchestrator = self.orchestrator.clone();

            let handle = tokio::spawn(async move {
                let result = orchestrator.run(request).await;
                drop(claim);
                sink(result);
            });
            tasks.push((side, handle));
        }

        info!("Dispatched prompt ({} chars) to {} side(s)", prompt.len(), tasks.len());
        Ok(DispatchHandle { tasks })
    }
}
