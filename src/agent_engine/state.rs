use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// Outcome of judging one executed step against the current screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub confidence: f64,
    pub reasoning: String,
    pub screenshot_path: Option<PathBuf>,
    pub validation_prompt: Option<String>,
    /// Full structured model verdict, or a synthesized one describing why there is none.
    pub llm_response: Option<serde_json::Value>,
    pub should_retry: bool,
    pub retry_reason: String,
    pub plan_update: Option<StateReport>,
}

impl VerificationResult {
    pub fn new(success: bool, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            success,
            confidence,
            reasoning: reasoning.into(),
            screenshot_path: None,
            validation_prompt: None,
            llm_response: None,
            should_retry: false,
            retry_reason: String::new(),
            plan_update: None,
        }
    }

    pub fn suggested_next_action(&self) -> Option<&str> {
        self.llm_response
            .as_ref()?
            .get("suggested_next_action")?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default = "default_priority", deserialize_with = "priority_or_default")]
    pub priority: String,
}

fn default_priority() -> String {
    "medium".into()
}

/// Models often send `null` for fields they have nothing to say about.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn priority_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_priority))
}

/// Task-level progress reconciliation. Advisory only; nothing here mutates a running plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateReport {
    #[serde(deserialize_with = "null_as_default")]
    pub current_progress: String,
    #[serde(deserialize_with = "null_as_default")]
    pub remaining_work: String,
    #[serde(deserialize_with = "null_as_default")]
    pub task_completed: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub completion_confidence: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub approach_working: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub suggested_next_actions: Vec<SuggestedAction>,
    #[serde(deserialize_with = "null_as_default")]
    pub plan_update_needed: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub plan_update_reason: String,
    #[serde(deserialize_with = "null_as_default")]
    pub obstacles: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub confidence: f64,
}

impl StateReport {
    /// Report used when analysis itself failed: not complete, replanning advised.
    pub fn degraded(error: &str) -> Self {
        Self {
            current_progress: "Unable to analyze current state".into(),
            remaining_work: "Unknown".into(),
            task_completed: false,
            completion_confidence: 0.0,
            approach_working: false,
            suggested_next_actions: Vec::new(),
            plan_update_needed: true,
            plan_update_reason: format!("State analysis failed: {error}"),
            obstacles: vec![format!("Analysis error: {error}")],
            confidence: 0.0,
        }
    }
}
