use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{AgentlyError, AgentlyResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

pub enum Reply {
    Content(String),
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, CallConfig)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, content: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Content(content.into()));
        self
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Fail(message.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> (Vec<ChatMessage>, CallConfig) {
        self.requests.lock().unwrap()[index].clone()
    }

    /// Concatenated display text of every message in the given request.
    pub fn request_text(&self, index: usize) -> String {
        self.request(index)
            .0
            .iter()
            .map(|m| m.content.as_display_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> AgentlyResult<LlmResponse> {
        self.requests.lock().unwrap().push((messages, cfg.clone()));
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Content(content)) => Ok(LlmResponse {
                content,
                usage: Some(serde_json::json!({ "total_tokens": 10 })),
                model: Some(cfg.model.clone()),
            }),
            Some(Reply::Fail(message)) => Err(AgentlyError::LlmProvider(message)),
            None => Err(AgentlyError::LlmProvider("no scripted reply left".into())),
        }
    }
}
