use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::AgentlyError;
use crate::planner::action::ActionDescriptor;

/// Accessibility snapshot of the screen as produced by the automation executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiGraph {
    #[serde(default)]
    pub elements: BTreeMap<String, UiElement>,
    #[serde(default)]
    pub root_elements: Vec<String>,
    #[serde(default)]
    pub active_application: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Raw AX value; text fields report strings, sliders and checkboxes report numbers.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub position: Option<Point>,
    #[serde(default)]
    pub size: Option<Size>,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_focused: bool,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

impl UiElement {
    pub fn role_or_unknown(&self) -> &str {
        self.role.as_deref().unwrap_or("unknown")
    }

    pub fn value_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// First non-empty of label, title, value.
    pub fn display_text(&self) -> String {
        non_empty(self.label.as_deref())
            .or_else(|| non_empty(self.title.as_deref()))
            .map(str::to_string)
            .or_else(|| self.value_text().filter(|v| !v.is_empty()))
            .unwrap_or_default()
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The action that failed, as the executor reported it (string or object).
    #[serde(default)]
    pub failed_action: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningContext {
    pub task: String,
    #[serde(default)]
    pub ui_graph: UiGraph,
    #[serde(default)]
    pub active_application: Option<String>,
    #[serde(default)]
    pub previous_actions: Vec<serde_json::Value>,
    #[serde(default)]
    pub error_context: Option<ErrorContext>,
}

impl PlanningContext {
    pub fn new(task: impl Into<String>, ui_graph: UiGraph) -> Self {
        let active_application = ui_graph.active_application.clone();
        Self {
            task: task.into(),
            ui_graph,
            active_application,
            previous_actions: Vec::new(),
            error_context: None,
        }
    }

    pub fn with_error(mut self, error_context: ErrorContext) -> Self {
        self.error_context = Some(error_context);
        self
    }

    pub fn with_previous_actions(mut self, actions: Vec<serde_json::Value>) -> Self {
        self.previous_actions = actions;
        self
    }

    /// Application named by the graph, else the one supplied by the caller.
    pub fn active_application(&self) -> Option<&str> {
        self.ui_graph
            .active_application
            .as_deref()
            .or(self.active_application.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub reasoning: String,
    /// Action descriptors in execution order; strings in the call grammar or objects.
    pub actions: Vec<serde_json::Value>,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ActionPlan {
    pub fn fallback(reasoning: String) -> Self {
        Self {
            reasoning,
            actions: Vec::new(),
            confidence: 0.0,
            metadata: None,
        }
    }

    pub fn is_recovery(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("is_recovery"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// String-form actions parsed into descriptors. Object-form or unparseable entries are
    /// skipped; they stay available in `actions` for the executor.
    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions
            .iter()
            .filter_map(|a| a.as_str())
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

/// Result of a planning call. Planning never fails outright: a failure still yields a
/// zero-confidence plan with no actions, alongside the cause.
#[derive(Debug)]
pub enum PlanOutcome {
    Planned(ActionPlan),
    Fallback { plan: ActionPlan, error: AgentlyError },
}

impl PlanOutcome {
    pub fn plan(&self) -> &ActionPlan {
        match self {
            PlanOutcome::Planned(plan) | PlanOutcome::Fallback { plan, .. } => plan,
        }
    }

    pub fn into_plan(self) -> ActionPlan {
        match self {
            PlanOutcome::Planned(plan) | PlanOutcome::Fallback { plan, .. } => plan,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PlanOutcome::Fallback { .. })
    }

    pub fn error(&self) -> Option<&AgentlyError> {
        match self {
            PlanOutcome::Planned(_) => None,
            PlanOutcome::Fallback { error, .. } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_defaults_previous_actions_to_empty() {
        let ctx: PlanningContext = serde_json::from_value(json!({
            "task": "Click the submit button",
            "ui_graph": { "elements": {}, "activeApplication": "TestApp" }
        }))
        .unwrap();
        assert!(ctx.previous_actions.is_empty());
        assert!(ctx.error_context.is_none());
        assert_eq!(ctx.active_application(), Some("TestApp"));
    }

    #[test]
    fn graph_uses_accessibility_field_names() {
        let graph: UiGraph = serde_json::from_value(json!({
            "elements": {
                "slider_1": {
                    "id": "slider_1",
                    "role": "AXSlider",
                    "value": 42,
                    "isEnabled": true,
                    "applicationName": "Music",
                    "position": {"x": 10, "y": 20}
                }
            },
            "rootElements": ["slider_1"],
            "activeApplication": "Music"
        }))
        .unwrap();
        let slider = &graph.elements["slider_1"];
        assert!(slider.is_enabled);
        assert_eq!(slider.application_name.as_deref(), Some("Music"));
        assert_eq!(slider.value_text().as_deref(), Some("42"));
        assert_eq!(slider.display_text(), "42");
        assert_eq!(graph.root_elements, vec!["slider_1"]);
    }

    #[test]
    fn display_text_prefers_label_then_title() {
        let element = UiElement {
            title: Some("Submit".into()),
            label: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(element.display_text(), "Submit");
    }

    #[test]
    fn descriptors_skip_object_actions() {
        let plan = ActionPlan {
            reasoning: String::new(),
            actions: vec![
                json!("click(button_1)"),
                json!({"type": "click", "target_element_id": "button_1"}),
                json!("wait(\"2\")"),
            ],
            confidence: 0.8,
            metadata: None,
        };
        assert_eq!(plan.descriptors().len(), 2);
        assert!(!plan.is_recovery());
    }
}
