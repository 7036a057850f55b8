use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{AgentlyError, AgentlyResult};
use crate::llm::types::{CallConfig, ChatMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    InitialPlanning,
    ErrorRecovery,
    ElementSelection,
    StepVerification,
    StateAnalysis,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::InitialPlanning => "initial_planning",
            ConversationKind::ErrorRecovery => "error_recovery",
            ConversationKind::ElementSelection => "element_selection",
            ConversationKind::StepVerification => "step_verification",
            ConversationKind::StateAnalysis => "state_analysis",
        }
    }
}

/// Append-only markdown transcripts under `<log_dir>/llm_conversations/NN_<kind>.md`.
///
/// The counter belongs to this instance; share one logger per run, not across runs.
pub struct ConversationLogger {
    log_dir: Option<PathBuf>,
    session_id: String,
    counter: AtomicUsize,
}

impl ConversationLogger {
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self {
            log_dir,
            session_id: uuid::Uuid::new_v4().to_string(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.log_dir.is_some()
    }

    pub fn counter(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn increment_counter(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Path of the transcript for the current counter value.
    pub fn transcript_path(&self, kind: ConversationKind) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| {
            dir.join("llm_conversations")
                .join(format!("{:02}_{}.md", self.counter(), kind.as_str()))
        })
    }

    /// Creates the transcript and writes the outgoing messages.
    pub fn log_request(&self, kind: ConversationKind, messages: &[ChatMessage], cfg: &CallConfig) {
        self.guarded(kind, "request", |path| {
            let mut text = header(kind, cfg, &self.session_id);
            text.push_str(&render_messages(messages));
            write_file(path, &text, false)
        });
    }

    /// Appends the model output and its usage metadata.
    pub fn log_response(
        &self,
        kind: ConversationKind,
        response: &str,
        metadata: Option<&serde_json::Value>,
    ) {
        if response.is_empty() {
            return;
        }
        self.guarded(kind, "response", |path| {
            let mut text = String::from("## Assistant Response\n\n");
            text.push_str(&format!("**Response Timestamp:** {}\n\n", now()));
            text.push_str(&render_response(response, metadata));
            write_file(path, &text, true)
        });
    }

    /// Appends a failure description.
    pub fn log_error(&self, kind: ConversationKind, error: &str) {
        if error.is_empty() {
            return;
        }
        self.guarded(kind, "error", |path| {
            let text = format!(
                "## Error\n\n**Error Timestamp:** {}\n**Error:** {}\n\n---\n\n",
                now(),
                error
            );
            write_file(path, &text, true)
        });
    }

    /// Writes a whole exchange at once, for callers that do not need staging.
    pub fn log_complete(
        &self,
        kind: ConversationKind,
        messages: &[ChatMessage],
        cfg: &CallConfig,
        response: &str,
        metadata: Option<&serde_json::Value>,
    ) {
        if response.is_empty() {
            return;
        }
        self.guarded(kind, "complete", |path| {
            let mut text = header(kind, cfg, &self.session_id);
            text.push_str(&render_messages(messages));
            text.push_str("## Assistant Response\n\n");
            text.push_str(&render_response(response, metadata));
            write_file(path, &text, false)
        });
    }

    fn guarded<F>(&self, kind: ConversationKind, stage: &str, write: F)
    where
        F: FnOnce(&Path) -> AgentlyResult<()>,
    {
        let Some(path) = self.transcript_path(kind) else {
            return;
        };
        let result = path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .map_err(AgentlyError::from)
            .and_then(|_| write(&path));
        match result {
            Ok(()) => tracing::debug!(path = %path.display(), stage, "conversation logged"),
            Err(e) => tracing::warn!(error = %e, stage, "failed to log LLM conversation"),
        }
    }
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

fn header(kind: ConversationKind, cfg: &CallConfig, session_id: &str) -> String {
    format!(
        "# LLM Conversation: {}\n\n**Session:** {}\n**Timestamp:** {}\n**Model:** {}\n**Temperature:** {}\n**Max Tokens:** {}\n\n",
        kind.as_str(),
        session_id,
        now(),
        cfg.model,
        cfg.temperature,
        cfg.max_tokens
    )
}

fn render_messages(messages: &[ChatMessage]) -> String {
    let mut text = String::new();
    for message in messages {
        text.push_str(&format!(
            "## {} Message\n\n```\n{}\n```\n\n",
            title_case(&message.role),
            message.content.as_display_text()
        ));
    }
    text
}

fn render_response(response: &str, metadata: Option<&serde_json::Value>) -> String {
    let mut text = String::new();
    if let Some(meta) = metadata {
        let pretty = serde_json::to_string_pretty(meta).unwrap_or_default();
        text.push_str(&format!("**Response Metadata:**\n```json\n{pretty}\n```\n\n"));
    }
    text.push_str(&format!("**Content:**\n```\n{response}\n```\n\n---\n\n"));
    text
}

fn title_case(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn write_file(path: &Path, text: &str, append: bool) -> AgentlyResult<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    file.write_all(text.as_bytes())?;
    Ok(())
}
