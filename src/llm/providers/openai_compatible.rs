use async_trait::async_trait;

use crate::errors::{AgentlyError, AgentlyResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> AgentlyResult<LlmResponse> {
        let body = build_request_body(&messages, cfg)?;

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            json_mode = cfg.json_mode,
            "sending LLM request"
        );
        tracing::debug!(
            body = %serde_json::to_string(&sanitize_for_log(&body)).unwrap_or_default(),
            "request body (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(AgentlyError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        let json: serde_json::Value = response.json().await?;
        let parsed = parse_completion(&json);

        tracing::info!(
            provider = %self.id,
            content_len = parsed.content.len(),
            "LLM JSON response received"
        );
        Ok(parsed)
    }
}

/// Builds the chat-completions request body.
pub(crate) fn build_request_body(
    messages: &[ChatMessage],
    cfg: &CallConfig,
) -> AgentlyResult<serde_json::Value> {
    let mut body = serde_json::json!({
        "model": cfg.model,
        "messages": serde_json::to_value(messages)?,
        "temperature": cfg.temperature,
        "max_tokens": cfg.max_tokens,
    });
    if cfg.json_mode {
        body["response_format"] = serde_json::json!({ "type": "json_object" });
    }
    Ok(body)
}

/// Clone of `body` with image payloads replaced, for logging only.
/// The real request still carries the images.
fn sanitize_for_log(body: &serde_json::Value) -> serde_json::Value {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            // content can be string or array of parts; we only touch the array case.
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    log_body
}

fn parse_completion(json: &serde_json::Value) -> LlmResponse {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();
    let usage = json.get("usage").filter(|u| !u.is_null()).cloned();
    let model = json["model"].as_str().map(str::to_string);
    LlmResponse {
        content,
        usage,
        model,
    }
}
