//! Core data model shared by the registry, orchestrator and dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorKind;

/// Model identifier as known to the inference server (e.g. `vendor/model-id`).
pub type ModelName = String;

/// Identifier of one loaded instance of a model (e.g. `vendor/model-id:2`).
pub type InstanceId = String;

/// One of the independent generation slots driven by a shared prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Every side, in dispatch order.
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the registry believes is loaded for a side.
///
/// Both fields are always written together so readers never observe a model
/// paired with another model's instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryEntry {
    pub loaded_model: Option<ModelName>,
    pub instance_id: Option<InstanceId>,
}

impl RegistryEntry {
    pub fn is_empty(&self) -> bool {
        self.loaded_model.is_none() && self.instance_id.is_none()
    }
}

/// A currently loaded instance as reported by `GET /api/v1/models`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedInstance {
    pub id: InstanceId,
}

/// Successful reply of the chat endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub instance_id: InstanceId,
    pub stats: Option<serde_json::Value>,
}

/// Null, `{}` and `[]` carry no statistics worth showing.
pub(crate) fn is_empty_json(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// One side's unit of work, built by the dispatcher per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub side: Side,
    pub model_name: ModelName,
    pub prompt_text: String,
    pub expected_instance_id: InstanceId,
}

/// Terminal outcome of one orchestrator run, handed to the side's sink.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub side: Side,
    pub model_name: ModelName,
    /// Generated markdown (plus optional stats block), or a short diagnostic.
    pub display_text: String,
    pub succeeded: bool,
    pub error_kind: Option<ErrorKind>,
    /// Instance that answered, when the server answered at all.
    pub instance_id: Option<InstanceId>,
}

impl GenerationResult {
    pub fn success(request: &GenerationRequest, display_text: String, instance_id: InstanceId) -> Self {
        Self {
            side: request.side,
            model_name: request.model_name.clone(),
            display_text,
            succeeded: true,
            error_kind: None,
            instance_id: Some(instance_id),
        }
    }

    pub fn failure(
        request: &GenerationRequest,
        kind: ErrorKind,
        message: String,
        instance_id: Option<InstanceId>,
    ) -> Self {
        Self {
            side: request.side,
            model_name: request.model_name.clone(),
            display_text: message,
            succeeded: false,
            error_kind: Some(kind),
            instance_id,
        }
    }
}
