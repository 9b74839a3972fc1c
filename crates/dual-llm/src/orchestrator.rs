//! Per-side generation state machine.
//!
//! ```text
//! FAST_PATH ──ok──────────────────────────────► verify ─► SUCCESS | InstanceMismatch
//!     │
//!     └─err─► PIVOT: start duplicate watcher
//!                    ensure loaded
//!                    retry once ──ok──► stop watcher ─► verify
//!                               └─err─► stop watcher ─► RecoveryFailed
//! ```
//!
//! Every run ends in a [`GenerationResult`]; no error leaves this module.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::GenerationError;
use crate::inference::InferenceBackend;
use crate::metrics;
use crate::reconciler::DuplicateReconciler;
use crate::registry::ModelRegistry;
use crate::types::{is_empty_json, GenerationOutput, GenerationRequest, GenerationResult, InstanceId, Side};

pub struct GenerationOrchestrator {
    backend: Arc<dyn InferenceBackend>,
    registry: Arc<ModelRegistry>,
    reconciler: Arc<DuplicateReconciler>,
    /// Upper bound on waiting for the duplicate watcher to exit.
    join_timeout: Duration,
}

impl GenerationOrchestrator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        registry: Arc<ModelRegistry>,
        reconciler: Arc<DuplicateReconciler>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            registry,
            reconciler,
            join_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn reconciler(&self) -> &Arc<DuplicateReconciler> {
        &self.reconciler
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Drive one request to its terminal result.
    pub async fn run(&self, request: GenerationRequest) -> GenerationResult {
        debug!(
            "[{}] generating with {} (expecting {})",
            request.side, request.model_name, request.expected_instance_id
        );

        match self.execute(&request).await {
            Ok(output) => {
                self.registry
                    .record(request.side, &request.model_name, &output.instance_id);
                metrics::record_generation(request.side, None);
                info!("[{}] {} answered ({} chars)", request.side, output.instance_id, output.text.len());

                let display_text = assemble_display_text(&output.text, output.stats.as_ref());
                GenerationResult::success(&request, display_text, output.instance_id)
            }
            Err((err, answered_by)) => {
                let kind = err.kind();
                error!("[{}] generation with {} failed ({}): {}", request.side, request.model_name, kind, err);
                metrics::record_generation(request.side, Some(kind));
                GenerationResult::failure(&request, kind, err.to_string(), answered_by)
            }
        }
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, (GenerationError, Option<InstanceId>)> {
        let output = match self
            .backend
            .generate(&request.model_name, &request.prompt_text)
            .await
        {
            Ok(output) => output,
            Err(first_err) => {
                warn!(
                    "[{}] Initial request failed for {}: {}. Pivoting to load/unload flow.",
                    request.side, request.model_name, first_err
                );
                metrics::inc_pivot(request.side);
                self.recover(request).await.map_err(|e| (e, None))?
            }
        };

        Self::verify_identity(request, &output).map_err(|e| (e, Some(output.instance_id.clone())))?;

        if output.text.is_empty() {
            return Err((
                GenerationError::Parse(format!("No response from {}", request.model_name)),
                Some(output.instance_id),
            ));
        }

        Ok(output)
    }

    /// Pivot path: watch for duplicates, make sure the model is loaded, and
    /// retry exactly once.
    async fn recover(&self, request: &GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        let watcher = self.reconciler.start_loop(&request.model_name);

        self.ensure_loaded(request.side, &request.model_name).await;
        let retry = self
            .backend
            .generate(&request.model_name, &request.prompt_text)
            .await;

        watcher.stop(self.join_timeout).await;

        retry.map_err(|source| GenerationError::RecoveryFailed { source })
    }

    /// Adopt an already loaded instance of `model_name`, or load it.
    ///
    /// The registry is updated either way; a failed load records the bare
    /// model name so the retry still targets something.
    pub async fn ensure_loaded(&self, side: Side, model_name: &str) -> InstanceId {
        let loaded = self.backend.list_loaded().await;

        if loaded.iter().any(|instance| instance.id == model_name) {
            debug!("[{}] {} already loaded, adopting it", side, model_name);
            self.registry.record(side, model_name, model_name);
            return model_name.to_string();
        }

        let instance_id = match self.backend.load(model_name).await {
            Some(id) => id,
            None => {
                warn!("[{}] load of {} failed, retrying against the bare name", side, model_name);
                model_name.to_string()
            }
        };
        self.registry.record(side, model_name, &instance_id);
        instance_id
    }

    fn verify_identity(request: &GenerationRequest, output: &GenerationOutput) -> Result<(), GenerationError> {
        if output.instance_id == request.expected_instance_id {
            return Ok(());
        }
        warn!(
            "Response for {} came from {}, expected {}",
            request.side, output.instance_id, request.expected_instance_id
        );
        Err(GenerationError::InstanceMismatch {
            expected: request.expected_instance_id.clone(),
            actual: output.instance_id.clone(),
        })
    }
}

/// Generated text, followed by a fenced JSON stats block when the server sent
/// non-empty statistics.
pub fn assemble_display_text(text: &str, stats: Option<&serde_json::Value>) -> String {
    let stats_json = stats
        .filter(|s| !is_empty_json(s))
        .and_then(|s| serde_json::to_string_pretty(s).ok());

    match stats_json {
        Some(json) => format!("{}\n\n**Stats**:\n```json\n{}\n```\n", text, json),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::inference::ClientError;
    use crate::reconciler::InstanceMatcher;
    use crate::test_support::{ok_output, transport_error, FakeBackend};
    use serde_json::json;

    fn orchestrator(backend: Arc<FakeBackend>) -> GenerationOrchestrator {
        let registry = Arc::new(ModelRegistry::new());
        let reconciler = Arc::new(DuplicateReconciler::new(
            backend.clone(),
            InstanceMatcher::default(),
            Duration::from_millis(20),
        ));
        GenerationOrchestrator::new(backend, registry, reconciler, Duration::from_secs(1))
    }

    fn request(side: Side, model: &str, expected: &str) -> GenerationRequest {
        GenerationRequest {
            side,
            model_name: model.to_string(),
            prompt_text: "Explain ownership".to_string(),
            expected_instance_id: expected.to_string(),
        }
    }

    // ===== Fast path =====

    #[tokio::test]
    async fn test_fast_path_success() {
        let backend = Arc::new(FakeBackend::new().script("m", vec![ok_output("Borrow it.", "m")]));
        let orch = orchestrator(backend.clone());

        let result = orch.run(request(Side::Left, "m", "m")).await;

        assert!(result.succeeded);
        assert_eq!(result.display_text, "Borrow it.");
        assert_eq!(result.error_kind, None);
        assert_eq!(backend.generate_calls().len(), 1);
        assert!(backend.load_calls().is_empty());
        assert_eq!(orch.reconciler().stats().loops_started, 0);

        let entry = orch.registry().lookup(Side::Left);
        assert_eq!(entry.loaded_model.as_deref(), Some("m"));
        assert_eq!(entry.instance_id.as_deref(), Some("m"));
    }

    #[tokio::test]
    async fn test_fast_path_mismatch_is_not_retried() {
        let backend = Arc::new(
            FakeBackend::new().script("modelA", vec![ok_output("text from the wrong instance", "modelA:2")]),
        );
        let orch = orchestrator(backend.clone());

        let result = orch.run(request(Side::Left, "modelA", "modelA:1")).await;

        assert!(!result.succeeded);
        assert_eq!(result.error_kind, Some(ErrorKind::InstanceMismatch));
        assert!(result.display_text.contains("modelA:1"));
        assert!(result.display_text.contains("modelA:2"));
        assert_eq!(result.instance_id.as_deref(), Some("modelA:2"));
        assert_eq!(backend.generate_calls().len(), 1);
        assert!(backend.load_calls().is_empty());
        assert!(orch.registry().lookup(Side::Left).is_empty());
    }

    #[tokio::test]
    async fn test_mismatch_wins_over_empty_text() {
        let backend = Arc::new(FakeBackend::new().script("m", vec![ok_output("", "m:9")]));
        let orch = orchestrator(backend);

        let result = orch.run(request(Side::Right, "m", "m")).await;
        assert_eq!(result.error_kind, Some(ErrorKind::InstanceMismatch));
    }

    #[tokio::test]
    async fn test_empty_message_is_parse_error() {
        let backend = Arc::new(FakeBackend::new().script("m", vec![ok_output("", "m")]));
        let orch = orchestrator(backend);

        let result = orch.run(request(Side::Left, "m", "m")).await;
        assert_eq!(result.error_kind, Some(ErrorKind::ParseError));
        assert!(result.display_text.contains("No response from m"));
    }

    #[tokio::test]
    async fn test_stats_block_is_appended() {
        let backend = Arc::new(FakeBackend::new().script(
            "m",
            vec![Ok(GenerationOutput {
                text: "Hi".to_string(),
                instance_id: "m".to_string(),
                stats: Some(json!({"tokens_per_second": 12.5})),
            })],
        ));
        let orch = orchestrator(backend);

        let result = orch.run(request(Side::Left, "m", "m")).await;
        assert!(result.succeeded);
        assert!(result.display_text.starts_with("Hi\n\n**Stats**:\n```json\n"));
        assert!(result.display_text.contains("\"tokens_per_second\": 12.5"));
        assert!(result.display_text.ends_with("```\n"));
    }

    // ===== Pivot and recovery =====

    #[tokio::test]
    async fn test_pivot_then_retry_succeeds() {
        let backend = Arc::new(
            FakeBackend::new().script("m", vec![transport_error("connection reset"), ok_output("Recovered", "m")]),
        );
        let orch = orchestrator(backend.clone());

        let result = orch.run(request(Side::Left, "m", "m")).await;

        assert!(result.succeeded);
        assert_eq!(result.display_text, "Recovered");
        assert_eq!(backend.generate_calls().len(), 2);
        assert_eq!(backend.load_calls(), vec!["m"]);

        let stats = orch.reconciler().stats();
        assert_eq!(stats.loops_started, 1);
        assert_eq!(stats.loops_stopped, 1);
        assert_eq!(stats.loops_active, 0);
    }

    #[tokio::test]
    async fn test_parse_failure_also_pivots() {
        let backend = Arc::new(FakeBackend::new().script(
            "m",
            vec![Err(ClientError::Parse("no message output".into())), ok_output("ok", "m")],
        ));
        let orch = orchestrator(backend.clone());

        let result = orch.run(request(Side::Left, "m", "m")).await;
        assert!(result.succeeded);
        assert_eq!(backend.generate_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_retry_is_terminal() {
        let backend = Arc::new(FakeBackend::new().script(
            "m",
            vec![
                transport_error("refused"),
                transport_error("still refused"),
                ok_output("never reached", "m"),
            ],
        ));
        let orch = orchestrator(backend.clone());

        let result = orch.run(request(Side::Right, "m", "m")).await;

        assert!(!result.succeeded);
        assert_eq!(result.error_kind, Some(ErrorKind::RecoveryFailed));
        assert!(result.display_text.contains("still refused"));
        assert_eq!(backend.generate_calls().len(), 2);
        assert_eq!(backend.load_calls().len(), 1);

        let stats = orch.reconciler().stats();
        assert_eq!(stats.loops_started, 1);
        assert_eq!(stats.loops_stopped, 1);
        assert_eq!(stats.loops_active, 0);
    }

    #[tokio::test]
    async fn test_watcher_gone_right_after_terminal_state() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_generate_delay(Duration::from_millis(30))
                .script("m", vec![transport_error("refused"), transport_error("refused")]),
        );
        let orch = orchestrator(backend.clone());

        orch.run(request(Side::Left, "m", "m")).await;
        assert_eq!(orch.reconciler().stats().loops_active, 0);

        let polls = backend.list_calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.list_calls(), polls);
    }

    #[tokio::test]
    async fn test_recovery_cleans_up_duplicates() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_generate_delay(Duration::from_millis(60))
                .with_loaded(&["m", "m:2"])
                .script("m", vec![transport_error("busy"), ok_output("ok", "m")]),
        );
        let orch = orchestrator(backend.clone());

        let result = orch.run(request(Side::Left, "m", "m")).await;

        assert!(result.succeeded);
        assert_eq!(backend.unload_calls(), vec!["m:2"]);
        assert_eq!(backend.loaded(), vec!["m"]);
    }

    #[tokio::test]
    async fn test_retry_answered_by_new_instance_is_mismatch() {
        let backend = Arc::new(
            FakeBackend::new()
                .load_reply("m", Some("m:2"))
                .script("m", vec![transport_error("unloaded"), ok_output("hello", "m:2")]),
        );
        let orch = orchestrator(backend.clone());

        let result = orch.run(request(Side::Left, "m", "m")).await;

        assert_eq!(result.error_kind, Some(ErrorKind::InstanceMismatch));
        assert_eq!(backend.generate_calls().len(), 2);
        // The load is still remembered, so the next run expects the new instance.
        assert_eq!(orch.registry().expected_instance(Side::Left, "m"), "m:2");
    }

    // ===== Ensure loaded =====

    #[tokio::test]
    async fn test_ensure_loaded_adopts_existing_instance() {
        let backend = Arc::new(FakeBackend::new().with_loaded(&["m"]));
        let orch = orchestrator(backend.clone());

        let id = orch.ensure_loaded(Side::Right, "m").await;

        assert_eq!(id, "m");
        assert!(backend.load_calls().is_empty());
        assert_eq!(orch.registry().lookup(Side::Right).instance_id.as_deref(), Some("m"));
    }

    #[tokio::test]
    async fn test_ensure_loaded_records_server_instance() {
        let backend = Arc::new(FakeBackend::new().load_reply("m", Some("m:3")));
        let orch = orchestrator(backend.clone());

        assert_eq!(orch.ensure_loaded(Side::Left, "m").await, "m:3");
        assert_eq!(orch.registry().lookup(Side::Left).instance_id.as_deref(), Some("m:3"));
    }

    #[tokio::test]
    async fn test_ensure_loaded_falls_back_to_name_on_failed_load() {
        let backend = Arc::new(FakeBackend::new().load_reply("m", None));
        let orch = orchestrator(backend.clone());

        assert_eq!(orch.ensure_loaded(Side::Left, "m").await, "m");
        assert_eq!(backend.load_calls(), vec!["m"]);
        let entry = orch.registry().lookup(Side::Left);
        assert_eq!(entry.loaded_model.as_deref(), Some("m"));
        assert_eq!(entry.instance_id.as_deref(), Some("m"));
    }

    // ===== Output assembly =====

    #[test]
    fn test_assemble_without_stats() {
        assert_eq!(assemble_display_text("plain", None), "plain");
        assert_eq!(assemble_display_text("plain", Some(&json!({}))), "plain");
        assert_eq!(assemble_display_text("plain", Some(&serde_json::Value::Null)), "plain");
    }
}
