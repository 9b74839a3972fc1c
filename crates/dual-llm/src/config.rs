// dual-llm/crates/dual-llm/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::types::{ModelName, Side};

pub const DEFAULT_BASE_URL: &str = "http://localhost:1234";
pub const DEFAULT_LEFT_MODEL: &str = "openai/gpt-oss-20b";
pub const DEFAULT_RIGHT_MODEL: &str = "deepseek/deepseek-r1-0528-qwen3-8b";
pub const DEFAULT_AVAILABLE_MODELS: [&str; 3] = [
    "google/gemma-3-12b",
    "deepseek/deepseek-r1-0528-qwen3-8b",
    "openai/gpt-oss-20b",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key: Option<String>,
    pub left_model: ModelName,
    pub right_model: ModelName,
    pub available_models: Vec<ModelName>,
    pub temperature: f64,
    pub flash_attention: bool,
    pub request_timeout_seconds: u64,
    pub reconcile_interval_ms: u64,
    pub reconcile_join_timeout_ms: u64,
    pub instance_separator: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            left_model: DEFAULT_LEFT_MODEL.to_string(),
            right_model: DEFAULT_RIGHT_MODEL.to_string(),
            available_models: DEFAULT_AVAILABLE_MODELS.iter().map(|m| m.to_string()).collect(),
            temperature: 0.7,
            flash_attention: true,
            request_timeout_seconds: 600,
            reconcile_interval_ms: 500,
            reconcile_join_timeout_ms: 1000,
            instance_separator: ":".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let defaults = Self::default();

        let available_models = match env::var("AVAILABLE_MODELS") {
            Ok(list) => Self::parse_model_list(&list),
            Err(_) => defaults.available_models,
        };

        let config = Self {
            base_url: env::var("INFERENCE_BASE_URL").unwrap_or(defaults.base_url),
            api_key: env::var("INFERENCE_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            left_model: env::var("LEFT_MODEL").unwrap_or(defaults.left_model),
            right_model: env::var("RIGHT_MODEL").unwrap_or(defaults.right_model),
            available_models,
            temperature: Self::parse_var("TEMPERATURE", defaults.temperature)?,
            flash_attention: Self::parse_var("FLASH_ATTENTION", defaults.flash_attention)?,
            request_timeout_seconds: Self::parse_var(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            reconcile_interval_ms: Self::parse_var("RECONCILE_INTERVAL_MS", defaults.reconcile_interval_ms)?,
            reconcile_join_timeout_ms: Self::parse_var(
                "RECONCILE_JOIN_TIMEOUT_MS",
                defaults.reconcile_join_timeout_ms,
            )?,
            instance_separator: env::var("INSTANCE_SEPARATOR").unwrap_or(defaults.instance_separator),
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_var<T>(name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match env::var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
            Err(_) => Ok(default),
        }
    }

    fn parse_model_list(raw: &str) -> Vec<ModelName> {
        raw.split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(anyhow::anyhow!(
                "INFERENCE_BASE_URL must start with http:// or https://, got: {}",
                self.base_url
            ));
        }
        if self.instance_separator.is_empty() {
            return Err(anyhow::anyhow!("INSTANCE_SEPARATOR must not be empty"));
        }
        if self.left_model.trim().is_empty() || self.right_model.trim().is_empty() {
            return Err(anyhow::anyhow!("LEFT_MODEL and RIGHT_MODEL must not be empty"));
        }
        if self.reconcile_interval_ms == 0 {
            return Err(anyhow::anyhow!("RECONCILE_INTERVAL_MS must be positive"));
        }
        Ok(())
    }

    pub fn default_model(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.left_model,
            Side::Right => &self.right_model,
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn reconcile_join_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_join_timeout_ms)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Backend URL: {}", self.base_url);
        info!("- API Key: {}", if self.api_key.is_some() { "set" } else { "not set" });
        info!("- Left Model: {}", self.left_model);
        info!("- Right Model: {}", self.right_model);
        info!("- Available Models: {}", self.available_models.join(", "));
        info!("- Temperature: {}", self.temperature);
        info!("- Flash Attention: {}", self.flash_attention);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!("- Reconcile Interval: {}ms", self.reconcile_interval_ms);
        info!("- Reconcile Join Timeout: {}ms", self.reconcile_join_timeout_ms);
        info!("- Instance Separator: {:?}", self.instance_separator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            base_url: "http://127.0.0.1:1234".to_string(),
            api_key: Some("sk-test".to_string()),
            ..Config::default()
        }
    }

    // ===== Defaults =====

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_default_models_are_in_catalog() {
        let config = Config::default();
        assert!(config.available_models.contains(&config.left_model));
        assert!(config.available_models.contains(&config.right_model));
        assert_ne!(config.left_model, config.right_model);
    }

    #[test]
    fn test_default_model_per_side() {
        let config = create_test_config();
        assert_eq!(config.default_model(Side::Left), DEFAULT_LEFT_MODEL);
        assert_eq!(config.default_model(Side::Right), DEFAULT_RIGHT_MODEL);
    }

    // ===== Durations =====

    #[test]
    fn test_reconcile_durations() {
        let config = create_test_config();
        assert_eq!(config.reconcile_interval(), Duration::from_millis(500));
        assert_eq!(config.reconcile_join_timeout(), Duration::from_secs(1));
        assert!(config.reconcile_join_timeout() >= config.reconcile_interval());
    }

    // ===== Validation =====

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = create_test_config();
        config.base_url = "localhost:1234".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_separator() {
        let mut config = create_test_config();
        config.instance_separator = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_model() {
        let mut config = create_test_config();
        config.right_model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = create_test_config();
        config.reconcile_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    // ===== Parsing helpers =====

    #[test]
    fn test_parse_model_list_trims_and_skips_empty() {
        let models = Config::parse_model_list(" a/b , ,c/d,");
        assert_eq!(models, vec!["a/b".to_string(), "c/d".to_string()]);
    }

    #[test]
    fn test_parse_var_uses_default_when_unset() {
        let value: u64 = Config::parse_var("DUAL_LLM_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_reports_invalid_value() {
        env::set_var("DUAL_LLM_TEST_BAD_NUMBER", "soon");
        let result: Result<u64> = Config::parse_var("DUAL_LLM_TEST_BAD_NUMBER", 1);
        env::remove_var("DUAL_LLM_TEST_BAD_NUMBER");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("DUAL_LLM_TEST_BAD_NUMBER"));
    }
}
