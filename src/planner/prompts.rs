use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::{AgentlyError, AgentlyResult};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// `{name}` placeholders; `{{` and `}}` are literal braces.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    name: &'static str,
    template: &'static str,
    required_variables: &'static [&'static str],
}

impl PromptTemplate {
    pub const fn new(
        name: &'static str,
        template: &'static str,
        required_variables: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            template,
            required_variables,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn required_variables(&self) -> &'static [&'static str] {
        self.required_variables
    }

    /// Substitutes every placeholder. Fails with [`AgentlyError::MissingVariable`] naming the
    /// first required (or referenced) variable that was not supplied. Substituted values are
    /// inserted verbatim and never re-scanned.
    pub fn format(&self, vars: &[(&str, &str)]) -> AgentlyResult<String> {
        let lookup = |name: &str| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);

        if let Some(missing) = self.required_variables.iter().copied().find(|&v| lookup(v).is_none()) {
            return Err(AgentlyError::MissingVariable(missing.to_string()));
        }
        for caps in PLACEHOLDER_RE.captures_iter(self.template) {
            if let Some(name) = caps.get(1) {
                if lookup(name.as_str()).is_none() {
                    return Err(AgentlyError::MissingVariable(name.as_str().to_string()));
                }
            }
        }

        let rendered = PLACEHOLDER_RE.replace_all(self.template, |caps: &Captures| match caps.get(1) {
            Some(name) => lookup(name.as_str()).unwrap_or_default().to_string(),
            None if &caps[0] == "{{" => "{".to_string(),
            None => "}".to_string(),
        });
        Ok(rendered.into_owned())
    }
}

pub const MAIN_SYSTEM: PromptTemplate =
    PromptTemplate::new("main_system", include_str!("../../prompts/system.md"), &[]);

pub const PLAN_GENERATION: PromptTemplate = PromptTemplate::new(
    "plan_generation",
    include_str!("../../prompts/plan_generation.md"),
    &["task", "ui_graph_summary", "relevant_elements"],
);

pub const ERROR_RECOVERY: PromptTemplate = PromptTemplate::new(
    "error_recovery",
    include_str!("../../prompts/error_recovery.md"),
    &[
        "failed_action",
        "error_message",
        "current_ui_state",
        "original_task",
        "completed_actions",
    ],
);

pub const ELEMENT_SELECTION: PromptTemplate = PromptTemplate::new(
    "element_selection",
    include_str!("../../prompts/element_selection.md"),
    &["intent", "elements"],
);

pub const VERIFICATION_SYSTEM: PromptTemplate = PromptTemplate::new(
    "verification_system",
    include_str!("../../prompts/verification_system.md"),
    &[],
);

pub const STEP_VERIFICATION: PromptTemplate = PromptTemplate::new(
    "step_verification",
    include_str!("../../prompts/step_verification.md"),
    &["user_task", "step_description", "action_type", "action_description"],
);

pub const ANALYSIS_SYSTEM: PromptTemplate = PromptTemplate::new(
    "analysis_system",
    include_str!("../../prompts/analysis_system.md"),
    &[],
);

pub const STATE_ANALYSIS: PromptTemplate = PromptTemplate::new(
    "state_analysis",
    include_str!("../../prompts/state_analysis.md"),
    &["user_task", "current_step", "completed_actions"],
);
