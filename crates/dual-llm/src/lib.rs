// dual-llm/crates/dual-llm/src/lib.rs

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;
pub mod render;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Public API exports
pub use config::Config;
pub use dispatcher::{channel_sink, DispatchError, DispatchHandle, Dispatcher, ResultSink};
pub use error::{ErrorKind, GenerationError};
pub use inference::{ClientError, ClientSettings, InferenceBackend, InferenceClient};
pub use orchestrator::GenerationOrchestrator;
pub use reconciler::{DuplicateReconciler, InstanceMatcher, ReconcileLoop, ReconcilerStats};
pub use registry::ModelRegistry;
pub use render::{render_markdown, to_plain_text, SpanStyle, StyledSpan};
pub use types::{
    GenerationOutput, GenerationRequest, GenerationResult, InstanceId, LoadedInstance, ModelName, RegistryEntry, Side,
};
