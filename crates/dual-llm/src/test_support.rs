//! Scripted in-memory inference backend for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::inference::{ClientError, InferenceBackend};
use crate::types::{GenerationOutput, InstanceId, LoadedInstance};

#[derive(Default)]
struct FakeState {
    loaded: Vec<InstanceId>,
    generate_script: HashMap<String, VecDeque<Result<GenerationOutput, ClientError>>>,
    load_reply: HashMap<String, Option<InstanceId>>,
    generate_calls: Vec<String>,
    load_calls: Vec<String>,
    unload_calls: Vec<String>,
    stuck: Vec<InstanceId>,
    list_calls: usize,
}

/// Behaves like a tiny model server: loads append instances, unloads remove
/// them, and `generate` pops scripted replies per model.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    generate_delay: Option<Duration>,
}

pub fn ok_output(text: &str, instance_id: &str) -> Result<GenerationOutput, ClientError> {
    Ok(GenerationOutput {
        text: text.to_string(),
        instance_id: instance_id.to_string(),
        stats: None,
    })
}

pub fn transport_error(msg: &str) -> Result<GenerationOutput, ClientError> {
    Err(ClientError::Transport(msg.to_string()))
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = Some(delay);
        self
    }

    pub fn with_loaded(self, ids: &[&str]) -> Self {
        self.state.lock().unwrap().loaded = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Make the server refuse to unload `id`.
    pub fn with_stuck_instance(self, id: &str) -> Self {
        self.state.lock().unwrap().stuck.push(id.to_string());
        self
    }

    /// Queue replies for successive `generate` calls on `model`.
    pub fn script(self, model: &str, replies: Vec<Result<GenerationOutput, ClientError>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .generate_script
            .entry(model.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Fix what `load(model)` reports; defaults to the bare model name.
    pub fn load_reply(self, model: &str, reply: Option<&str>) -> Self {
        self.state
            .lock()
            .unwrap()
            .load_reply
            .insert(model.to_string(), reply.map(str::to_string));
        self
    }

    pub fn generate_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().generate_calls.clone()
    }

    pub fn load_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().load_calls.clone()
    }

    pub fn unload_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().unload_calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn loaded(&self) -> Vec<String> {
        self.state.lock().unwrap().loaded.clone()
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn list_loaded(&self) -> Vec<LoadedInstance> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        state.loaded.iter().map(|id| LoadedInstance { id: id.clone() }).collect()
    }

    async fn load(&self, model_name: &str) -> Option<InstanceId> {
        let mut state = self.state.lock().unwrap();
        state.load_calls.push(model_name.to_string());
        let reply = state
            .load_reply
            .get(model_name)
            .cloned()
            .unwrap_or_else(|| Some(model_name.to_string()));
        if let Some(id) = &reply {
            state.loaded.push(id.clone());
        }
        reply
    }

    async fn unload(&self, instance_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.unload_calls.push(instance_id.to_string());
        if state.stuck.iter().any(|id| id == instance_id) {
            return false;
        }
        state.loaded.retain(|id| id != instance_id);
        true
    }

    async fn generate(&self, model_name: &str, _prompt: &str) -> Result<GenerationOutput, ClientError> {
        if let Some(delay) = self.generate_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.generate_calls.push(model_name.to_string());
        state
            .generate_script
            .get_mut(model_name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(ClientError::Transport(format!("no scripted reply for {}", model_name))))
    }
}
