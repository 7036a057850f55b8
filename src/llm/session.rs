use std::sync::Arc;

use crate::errors::{AgentlyError, AgentlyResult};
use crate::llm::conversation_log::{ConversationKind, ConversationLogger};
use crate::llm::provider::LlmProvider;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::llm::types::{CallConfig, ChatMessage};

/// A provider bound to one role's call settings, plus the run's transcript logger.
#[derive(Clone)]
pub struct LlmSession {
    provider: Arc<dyn LlmProvider>,
    cfg: CallConfig,
    logger: Arc<ConversationLogger>,
}

impl LlmSession {
    pub fn new(provider: Arc<dyn LlmProvider>, cfg: CallConfig, logger: Arc<ConversationLogger>) -> Self {
        Self { provider, cfg, logger }
    }

    pub fn for_role(
        registry: &ProviderRegistry,
        role: Role,
        logger: Arc<ConversationLogger>,
    ) -> AgentlyResult<Self> {
        let (provider, cfg) = registry.call_config_for_role(role)?;
        Ok(Self::new(provider, cfg, logger))
    }

    pub fn call_config(&self) -> &CallConfig {
        &self.cfg
    }

    /// One logged request/response round trip.
    ///
    /// Blank content is reported as [`AgentlyError::EmptyResponse`]. The transcript counter
    /// advances whether or not the call succeeded.
    pub async fn exchange(
        &self,
        kind: ConversationKind,
        messages: Vec<ChatMessage>,
    ) -> AgentlyResult<String> {
        self.logger.log_request(kind, &messages, &self.cfg);
        let result = self.provider.chat(messages, &self.cfg).await;
        let outcome = match result {
            Ok(response) => {
                let metadata = serde_json::json!({
                    "model": response.model.clone().unwrap_or_else(|| self.cfg.model.clone()),
                    "usage": response.usage,
                });
                self.logger.log_response(kind, &response.content, Some(&metadata));
                if response.content.trim().is_empty() {
                    self.logger.log_error(kind, &AgentlyError::EmptyResponse.to_string());
                    Err(AgentlyError::EmptyResponse)
                } else {
                    Ok(response.content)
                }
            }
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "LLM API call failed");
                self.logger.log_error(kind, &e.to_string());
                Err(e)
            }
        };
        self.logger.increment_counter();
        outcome
    }
}
