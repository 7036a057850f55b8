use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent_engine::state_analyzer::StateAnalyzer;
use crate::agent_engine::verifier::{StepContext, StepVerifier};
use crate::config::AppConfig;
use crate::errors::AgentlyResult;
use crate::executor::runner::{AutomationExecutor, TaskRequest};
use crate::llm::conversation_log::ConversationLogger;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::llm::session::LlmSession;
use crate::perception::screenshot::CommandCapture;
use crate::planner::engine::PlanningEngine;
use crate::planner::types::{PlanOutcome, PlanningContext, UiElement};

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    Version,
    Plan {
        context: PlanningContext,
    },
    Recover {
        context: PlanningContext,
    },
    Select {
        intent: String,
        elements: Vec<UiElement>,
    },
    Verify {
        #[serde(flatten)]
        step: StepContext,
    },
    RunTasks {
        tasks: Vec<TaskRequest>,
        #[serde(default)]
        timeout_override: Option<u64>,
    },
}

pub struct Agent {
    planner: PlanningEngine,
    verifier: StepVerifier,
    executor: AutomationExecutor,
}

impl Agent {
    pub fn new(planner: PlanningEngine, verifier: StepVerifier, executor: AutomationExecutor) -> Self {
        Self {
            planner,
            verifier,
            executor,
        }
    }

    /// Wires every component from config. Planning uses the `planning` role; verification and
    /// state analysis share the `vision` role.
    pub fn from_config(config: &AppConfig, registry: &ProviderRegistry) -> AgentlyResult<Self> {
        let logger = Arc::new(ConversationLogger::new(
            config.logging.conversation_log_dir.clone(),
        ));
        let planning = LlmSession::for_role(registry, Role::Planning, logger.clone())?;
        let vision = LlmSession::for_role(registry, Role::Vision, logger)?;
        let capture = Arc::new(CommandCapture::new(&config.verifier.capture_command)?);

        Ok(Self::new(
            PlanningEngine::new(planning),
            StepVerifier::new(
                vision.clone(),
                StateAnalyzer::new(vision),
                capture,
                config.verifier.clone(),
            ),
            AutomationExecutor::new(config.executor.clone()),
        ))
    }

    pub async fn handle(&self, request: Request) -> AgentlyResult<Value> {
        match request {
            Request::Version => Ok(json!({ "version": env!("CARGO_PKG_VERSION") })),
            Request::Plan { context } => Ok(outcome_json(self.planner.generate_plan(&context).await)),
            Request::Recover { context } => {
                Ok(outcome_json(self.planner.recover_from_error(&context).await))
            }
            Request::Select { intent, elements } => {
                let element_id = self.planner.select_element(&intent, &elements).await;
                Ok(json!({ "element_id": element_id }))
            }
            Request::Verify { step } => {
                std::fs::create_dir_all(&step.run_dir)?;
                let result = self.verifier.verify_step(&step).await;
                Ok(serde_json::to_value(result)?)
            }
            Request::RunTasks {
                tasks,
                timeout_override,
            } => {
                let results = self.executor.run_suite(&tasks, timeout_override).await;
                let total = results.len();
                let succeeded = results.iter().filter(|r| r.success).count();
                Ok(json!({
                    "results": results,
                    "succeeded": succeeded,
                    "total": total,
                }))
            }
        }
    }
}

fn outcome_json(outcome: PlanOutcome) -> Value {
    let error = outcome.error().map(|e| e.to_string());
    let fallback = outcome.is_fallback();
    json!({
        "plan": outcome.into_plan(),
        "fallback": fallback,
        "error": error,
    })
}
