use serde_json::Value;

use crate::errors::AgentlyResult;
use crate::llm::conversation_log::ConversationKind;
use crate::llm::session::LlmSession;
use crate::llm::types::ChatMessage;
use crate::planner::json_repair::parse_json_object;
use crate::planner::prompts::{ELEMENT_SELECTION, ERROR_RECOVERY, MAIN_SYSTEM, PLAN_GENERATION};
use crate::planner::types::{ActionPlan, PlanOutcome, PlanningContext, UiElement};
use crate::planner::ui_summary::{
    format_elements_for_selection, interactive_elements_by_app, relevant_elements,
    summarize_ui_graph,
};

const DEFAULT_PLAN_CONFIDENCE: f64 = 0.5;
const RECOVERY_CONFIDENCE: f64 = 0.7;

/// Turns a task and UI snapshot into action plans through the planning model.
///
/// None of the public operations return `Err`; failures surface as [`PlanOutcome::Fallback`]
/// or `None` and are logged.
pub struct PlanningEngine {
    session: LlmSession,
}

impl PlanningEngine {
    pub fn new(session: LlmSession) -> Self {
        tracing::info!(model = %session.call_config().model, "planning engine ready");
        Self { session }
    }

    pub async fn generate_plan(&self, context: &PlanningContext) -> PlanOutcome {
        tracing::info!(task = %context.task, "generating plan");
        match self.try_generate_plan(context).await {
            Ok(plan) => {
                tracing::info!(
                    actions = plan.actions.len(),
                    confidence = plan.confidence,
                    "plan generated"
                );
                warn_on_unrecognized_actions(&plan);
                PlanOutcome::Planned(plan)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to generate plan");
                PlanOutcome::Fallback {
                    plan: ActionPlan::fallback(format!("Error in planning: {e}")),
                    error: e,
                }
            }
        }
    }

    async fn try_generate_plan(&self, context: &PlanningContext) -> AgentlyResult<ActionPlan> {
        let summary = summarize_ui_graph(&context.ui_graph, context.active_application());
        let relevant = relevant_elements(&context.ui_graph, &context.task);
        let user_prompt = PLAN_GENERATION.format(&[
            ("task", context.task.as_str()),
            ("ui_graph_summary", summary.as_str()),
            ("relevant_elements", relevant.as_str()),
        ])?;

        let response = self
            .call(ConversationKind::InitialPlanning, user_prompt)
            .await?;
        let data = parse_json_object(&response)?;

        Ok(ActionPlan {
            reasoning: string_field(&data, "reasoning"),
            actions: actions_field(&data),
            confidence: data
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_PLAN_CONFIDENCE)
                .clamp(0.0, 1.0),
            metadata: None,
        })
    }

    /// Plans around a failed action. Without an error context this is plain planning.
    pub async fn recover_from_error(&self, context: &PlanningContext) -> PlanOutcome {
        tracing::info!("generating error recovery plan");
        if context.error_context.is_none() {
            tracing::warn!("no error context provided for recovery");
            return self.generate_plan(context).await;
        }

        match self.try_recover(context).await {
            Ok(plan) => {
                tracing::info!(actions = plan.actions.len(), "recovery plan generated");
                warn_on_unrecognized_actions(&plan);
                PlanOutcome::Planned(plan)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to generate recovery plan");
                PlanOutcome::Fallback {
                    plan: ActionPlan::fallback(format!("Recovery planning failed: {e}")),
                    error: e,
                }
            }
        }
    }

    async fn try_recover(&self, context: &PlanningContext) -> AgentlyResult<ActionPlan> {
        let error_context = context.error_context.clone().unwrap_or_default();
        let failed_action = match error_context.failed_action {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => "unknown".to_string(),
            Some(other) => other.to_string(),
        };
        let error_message = error_context
            .error_message
            .unwrap_or_else(|| "unknown error".to_string());
        let current_ui_state = format!(
            "{}\n\nEnabled interactive elements:\n{}",
            summarize_ui_graph(&context.ui_graph, context.active_application()),
            interactive_elements_by_app(&context.ui_graph)
        );
        let completed_actions = serde_json::to_string(&context.previous_actions)?;

        let user_prompt = ERROR_RECOVERY.format(&[
            ("failed_action", failed_action.as_str()),
            ("error_message", error_message.as_str()),
            ("current_ui_state", current_ui_state.as_str()),
            ("original_task", context.task.as_str()),
            ("completed_actions", completed_actions.as_str()),
        ])?;

        let response = self
            .call(ConversationKind::ErrorRecovery, user_prompt)
            .await?;
        let data = parse_json_object(&response)?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("is_recovery".into(), Value::Bool(true));
        if let Some(retry) = data.get("should_retry_original").and_then(Value::as_bool) {
            metadata.insert("should_retry_original".into(), Value::Bool(retry));
        }

        Ok(ActionPlan {
            reasoning: string_field(&data, "recovery_strategy"),
            actions: actions_field(&data),
            confidence: RECOVERY_CONFIDENCE,
            metadata: Some(metadata),
        })
    }

    /// Asks the model to pick one element for `intent`. `None` when it declines or fails.
    pub async fn select_element(&self, intent: &str, elements: &[UiElement]) -> Option<String> {
        tracing::debug!(intent, candidates = elements.len(), "selecting element");
        match self.try_select(intent, elements).await {
            Ok(selected) => selected,
            Err(e) => {
                tracing::error!(error = %e, "failed to select element");
                None
            }
        }
    }

    async fn try_select(&self, intent: &str, elements: &[UiElement]) -> AgentlyResult<Option<String>> {
        let formatted = format_elements_for_selection(elements);
        let user_prompt = ELEMENT_SELECTION.format(&[("intent", intent), ("elements", formatted.as_str())])?;
        let response = self
            .call(ConversationKind::ElementSelection, user_prompt)
            .await?;
        let data = parse_json_object(&response)?;

        let element_id = data
            .get("element_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let reasoning = string_field(&data, "reasoning");
        tracing::debug!(element = ?element_id, reasoning = %reasoning, "element selected");
        Ok(element_id)
    }

    async fn call(&self, kind: ConversationKind, user_prompt: String) -> AgentlyResult<String> {
        let messages = vec![
            ChatMessage::system(MAIN_SYSTEM.format(&[])?),
            ChatMessage::user(user_prompt),
        ];
        self.session.exchange(kind, messages).await
    }
}

fn warn_on_unrecognized_actions(plan: &ActionPlan) {
    let textual = plan.actions.iter().filter(|a| a.is_string()).count();
    let recognized = plan.descriptors().len();
    if recognized < textual {
        tracing::warn!(textual, recognized, "plan contains actions outside the descriptor grammar");
    }
}

fn string_field(data: &serde_json::Map<String, Value>, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn actions_field(data: &serde_json::Map<String, Value>) -> Vec<Value> {
    match data.get("actions") {
        Some(Value::Array(actions)) => actions.clone(),
        _ => Vec::new(),
    }
}
