//! HTTP client for the inference server's `/api/v1` endpoints.
//!
//! Network-level timeouts are enforced here through the reqwest client; the
//! orchestrator only bounds the number of attempts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend_trait::{ClientError, InferenceBackend};
use crate::config::Config;
use crate::types::{is_empty_json, GenerationOutput, InstanceId, LoadedInstance};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub flash_attention: bool,
    pub request_timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            flash_attention: config.flash_attention,
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
    flash_attention: bool,
}

#[derive(Debug, Deserialize)]
struct LoadResponse {
    id: Option<String>,
    model_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnloadRequest<'a> {
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    input: &'a str,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    output: Option<Vec<OutputItem>>,
    model_id: Option<String>,
    id: Option<String>,
    stats: Option<serde_json::Value>,
    metrics: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
}

/// First of the two values that is present and non-empty.
fn first_non_empty(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    primary
        .filter(|s| !s.is_empty())
        .or_else(|| fallback.filter(|s| !s.is_empty()))
}

pub struct InferenceClient {
    base_url: String,
    api_key: Option<String>,
    temperature: f64,
    flash_attention: bool,
    http_client: reqwest::Client,
}

impl InferenceClient {
    pub fn new(settings: ClientSettings) -> Self {
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        info!("Inference client initialized with backend: {}", base_url);
        Self {
            base_url,
            api_key: settings.api_key.filter(|k| !k.is_empty()),
            temperature: settings.temperature,
            flash_attention: settings.flash_attention,
            http_client: reqwest::Client::builder()
                .timeout(settings.request_timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ClientSettings::from_config(config))
    }

    fn models_url(&self) -> String {
        format!("{}/api/v1/models", self.base_url)
    }

    fn load_url(&self) -> String {
        format!("{}/api/v1/models/load", self.base_url)
    }

    fn unload_url(&self) -> String {
        format!("{}/api/v1/models/unload", self.base_url)
    }

    fn chat_url(&self) -> String {
        format!("{}/api/v1/chat", self.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn fetch_loaded(&self) -> Result<Vec<LoadedInstance>, ClientError> {
        let response = self
            .authorized(self.http_client.get(self.models_url()))
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("model list request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "model list returned {}",
                response.status()
            )));
        }

        let body: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Parse(format!("failed to parse model list: {}", e)))?;

        Ok(body
            .data
            .into_iter()
            .filter_map(|entry| first_non_empty(entry.id, entry.model))
            .map(|id| LoadedInstance { id })
            .collect())
    }

    fn parse_chat(model_name: &str, body: &str) -> Result<GenerationOutput, ClientError> {
        let response: ChatResponse = serde_json::from_str(body)
            .map_err(|e| ClientError::Parse(format!("malformed chat response: {}", e)))?;

        let output = response
            .output
            .ok_or_else(|| ClientError::Parse("chat response has no output array".to_string()))?;

        let message = output
            .into_iter()
            .find(|item| item.kind.as_deref() == Some("message"))
            .ok_or_else(|| ClientError::Parse("chat response has no message output".to_string()))?;

        let text = message
            .content
            .ok_or_else(|| ClientError::Parse("message output has no content".to_string()))?;

        let instance_id = first_non_empty(response.model_id, response.id)
            .unwrap_or_else(|| model_name.to_string());

        let stats = response
            .stats
            .filter(|v| !is_empty_json(v))
            .or(response.metrics.filter(|v| !is_empty_json(v)));

        Ok(GenerationOutput { text, instance_id, stats })
    }
}

#[async_trait]
impl InferenceBackend for InferenceClient {
    async fn list_loaded(&self) -> Vec<LoadedInstance> {
        match self.fetch_loaded().await {
            Ok(instances) => {
                debug!("{} instance(s) currently loaded", instances.len());
                instances
            }
            Err(e) => {
                warn!("Error getting loaded models: {}", e);
                Vec::new()
            }
        }
    }

    async fn load(&self, model_name: &str) -> Option<InstanceId> {
        let request = LoadRequest {
            model: model_name,
            flash_attention: self.flash_attention,
        };

        let response = match self
            .authorized(self.http_client.post(self.load_url()))
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Error loading model {}: {}", model_name, e);
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Error loading model {} ({}): {}", model_name, status, body);
            return None;
        }

        let instance_id = match response.json::<LoadResponse>().await {
            Ok(body) => first_non_empty(body.id, body.model_id),
            Err(e) => {
                warn!("Load response for {} was not understood: {}", model_name, e);
                None
            }
        }
        .unwrap_or_else(|| model_name.to_string());

        info!("Model {} loaded successfully as {}", model_name, instance_id);
        Some(instance_id)
    }

    async fn unload(&self, instance_id: &str) -> bool {
        let request = UnloadRequest { model: instance_id };
        let result = self
            .authorized(self.http_client.post(self.unload_url()))
            .json(&request)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                info!("Model {} unloaded successfully", instance_id);
                true
            }
            Ok(resp) => {
                warn!("Error unloading model {}: server returned {}", instance_id, resp.status());
                false
            }
            Err(e) => {
                warn!("Error unloading model {}: {}", instance_id, e);
                false
            }
        }
    }

    async fn generate(&self, model_name: &str, prompt: &str) -> Result<GenerationOutput, ClientError> {
        debug!("Sending prompt ({} chars) to {}", prompt.len(), model_name);
        let request = ChatRequest {
            model: model_name,
            input: prompt,
            temperature: self.temperature,
        };

        let response = self
            .authorized(self.http_client.post(self.chat_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("chat request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Transport(format!("chat returned {}: {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to read chat response: {}", e)))?;

        Self::parse_chat(model_name, &body)
    }
}
