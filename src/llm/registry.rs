use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{AgentlyError, AgentlyResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Pipeline stages that talk to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Text-only planning, recovery and element selection.
    Planning,
    /// Screenshot-backed verification and state analysis.
    Vision,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Planning => "planning",
            Role::Vision => "vision",
        }
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    /// Kept for role-to-model lookups (does not need to be mutable after init).
    llm_config: LlmConfig,
    /// Provider ids that were registered without an API key.
    missing_keys: Vec<String>,
}

impl ProviderRegistry {
    pub fn new(active: String, llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config,
            missing_keys: Vec::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> AgentlyResult<Arc<dyn LlmProvider>> {
        self.providers
            .get(&self.active)
            .cloned()
            .ok_or_else(|| AgentlyError::Config(format!("Active provider '{}' not found in registry", self.active)))
    }

    /// Provider ids registered without a credential. Calls through them will fail and be
    /// absorbed by the fallback paths.
    pub fn missing_credentials(&self) -> &[String] {
        &self.missing_keys
    }

    /// Return the provider and call configuration for a pipeline role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature / max_tokens
    pub fn call_config_for_role(&self, role: Role) -> AgentlyResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry = match role {
            Role::Planning => self.llm_config.roles.planning.as_ref(),
            Role::Vision => self.llm_config.roles.vision.as_ref(),
        };
        let json_mode = role == Role::Vision;

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                AgentlyError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let provider_entry = self.llm_config.providers.get(&entry.provider);
            let temperature = entry
                .temperature
                .or_else(|| provider_entry.map(|p| p.temperature))
                .unwrap_or(0.1);
            let max_tokens = entry
                .max_tokens
                .or_else(|| provider_entry.map(|p| p.max_tokens))
                .unwrap_or(2000);
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %entry.model,
                temperature = temperature,
                "resolved role config"
            );
            return Ok((provider, CallConfig {
                model: entry.model.clone(),
                temperature,
                max_tokens,
                json_mode,
            }));
        }

        // Fallback: active provider, provider-level defaults
        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active);
        let (model, temperature, max_tokens) = entry
            .map(|p| (p.model.clone(), p.temperature, p.max_tokens))
            .unwrap_or_else(|| (String::new(), 0.1, 2000));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((provider, CallConfig { model, temperature, max_tokens, json_mode }))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from `AGENTLY_<ID>_API_KEY`, then the config entry, then `OPENAI_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new(config.llm.active_provider.clone(), config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("AGENTLY_{}_API_KEY", id.to_uppercase()))
                .ok()
                .or_else(|| entry.api_key.clone())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .unwrap_or_default();
            let provider = OpenAiCompatibleProvider::new(
                id.clone(),
                entry.api_base.clone(),
                api_key,
            );
            if !provider.has_api_key() {
                registry.missing_keys.push(id.clone());
            }
            registry.register(Arc::new(provider));
        }
        registry
    }
}
