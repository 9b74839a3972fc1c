use async_trait::async_trait;
use thiserror::Error;

use crate::types::{GenerationOutput, InstanceId, LoadedInstance};

/// Failure of a single remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Connectivity failure or non-2xx status
    #[error("transport error: {0}")]
    Transport(String),

    /// Body did not match the expected contract
    #[error("parse error: {0}")]
    Parse(String),
}

/// Remote model server contract.
///
/// Every method is exactly one remote call. Implementations never retry;
/// retry policy belongs to the orchestrator.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Currently loaded instances, in server order. Empty on failure.
    async fn list_loaded(&self) -> Vec<LoadedInstance>;

    /// Ask the server to load `model_name`.
    ///
    /// Returns the reported instance id, the bare model name when the server
    /// omits one, or `None` when the load failed.
    async fn load(&self, model_name: &str) -> Option<InstanceId>;

    /// Best-effort unload; failures are logged, never raised. Returns whether
    /// the server confirmed it.
    async fn unload(&self, instance_id: &str) -> bool;

    /// Send one prompt to `model_name`.
    async fn generate(&self, model_name: &str, prompt: &str) -> Result<GenerationOutput, ClientError>;
}
