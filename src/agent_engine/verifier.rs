use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent_engine::retry_policy::should_retry_step;
use crate::agent_engine::state::VerificationResult;
use crate::agent_engine::state_analyzer::StateAnalyzer;
use crate::config::VerifierConfig;
use crate::errors::AgentlyResult;
use crate::llm::conversation_log::ConversationKind;
use crate::llm::session::LlmSession;
use crate::llm::types::ChatMessage;
use crate::perception::screenshot::{
    capture_verification_screenshot, image_data_url, DownscaleOptions, ScreenCapture,
};
use crate::planner::action::ActionDescriptor;
use crate::planner::json_repair::parse_json_object;
use crate::planner::prompts::{STEP_VERIFICATION, VERIFICATION_SYSTEM};

/// One executed step to be judged.
#[derive(Debug, Clone, Deserialize)]
pub struct StepContext {
    pub step_description: String,
    pub action_type: String,
    pub action_description: String,
    pub run_dir: PathBuf,
    #[serde(default)]
    pub user_task: String,
    #[serde(default)]
    pub completed_actions: Vec<String>,
}

pub struct StepVerifier {
    session: LlmSession,
    analyzer: StateAnalyzer,
    capture: Arc<dyn ScreenCapture>,
    config: VerifierConfig,
}

impl StepVerifier {
    pub fn new(
        session: LlmSession,
        analyzer: StateAnalyzer,
        capture: Arc<dyn ScreenCapture>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            session,
            analyzer,
            capture,
            config,
        }
    }

    /// A configured simple action type, or a descriptor that needs no visual check.
    fn is_simple_action(&self, step: &StepContext) -> bool {
        let by_type = self
            .config
            .simple_action_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(step.action_type.trim()));
        by_type
            || step
                .action_description
                .parse::<ActionDescriptor>()
                .is_ok_and(|d| d.is_simple())
    }

    /// Judges whether `step` took effect. Always returns a result, with `should_retry` and
    /// `retry_reason` filled in and a state analysis attached when one was run.
    pub async fn verify_step(&self, step: &StepContext) -> VerificationResult {
        tracing::info!(step = %step.step_description, action = %step.action_type, "verifying step");

        if self.is_simple_action(step) {
            tracing::info!(action = %step.action_type, "simple action, skipping verification");
            let mut result = VerificationResult::new(
                true,
                1.0,
                format!("Simple action '{}' does not require verification", step.action_type),
            );
            (result.should_retry, result.retry_reason) = should_retry_step(&result);
            return result;
        }

        let screenshot = match capture_verification_screenshot(
            self.capture.as_ref(),
            &step.run_dir,
            DownscaleOptions::from(&self.config),
        )
        .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "screenshot capture failed, verifying without image");
                None
            }
        };

        let mut result = match STEP_VERIFICATION.format(&[
            ("user_task", step.user_task.as_str()),
            ("step_description", step.step_description.as_str()),
            ("action_type", step.action_type.as_str()),
            ("action_description", step.action_description.as_str()),
        ]) {
            Ok(prompt) => {
                let mut result = self.validate(&prompt, screenshot.as_deref()).await;
                result.validation_prompt = Some(prompt);
                result
            }
            Err(e) => failed_verification(&e.to_string()),
        };
        result.screenshot_path = screenshot;

        let threshold = self.config.state_analysis_after_actions;
        if !result.success || step.completed_actions.len() > threshold {
            let report = self
                .analyzer
                .analyze_state_and_suggest_plan(
                    &step.user_task,
                    &step.step_description,
                    &step.completed_actions,
                    result.screenshot_path.as_deref(),
                    &step.run_dir,
                )
                .await;
            result.plan_update = Some(report);
        }

        (result.should_retry, result.retry_reason) = should_retry_step(&result);
        tracing::info!(
            success = result.success,
            confidence = result.confidence,
            should_retry = result.should_retry,
            reason = %result.retry_reason,
            "verification finished"
        );
        result
    }

    async fn validate(&self, prompt: &str, screenshot: Option<&Path>) -> VerificationResult {
        match self.try_validate(prompt, screenshot).await {
            Ok(verdict) => {
                let success = verdict.get("success").and_then(Value::as_bool).unwrap_or(false);
                let confidence = verdict
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0);
                let reasoning = verdict
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .unwrap_or("No reasoning provided")
                    .to_string();
                tracing::debug!(%reasoning, "verification verdict");
                let mut result = VerificationResult::new(success, confidence, reasoning);
                result.llm_response = Some(Value::Object(verdict));
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "error during LLM validation");
                failed_verification(&e.to_string())
            }
        }
    }

    async fn try_validate(
        &self,
        prompt: &str,
        screenshot: Option<&Path>,
    ) -> AgentlyResult<serde_json::Map<String, Value>> {
        let image = match screenshot {
            Some(path) => image_data_url(path)
                .await
                .map_err(|e| tracing::warn!(error = %e, "screenshot unreadable, verifying without image"))
                .ok(),
            None => None,
        };
        let messages = vec![
            ChatMessage::system(VERIFICATION_SYSTEM.format(&[])?),
            ChatMessage::user_with_image(prompt, image),
        ];
        let response = self
            .session
            .exchange(ConversationKind::StepVerification, messages)
            .await?;
        parse_json_object(&response)
    }
}

/// Failed result whose `llm_response` has the same shape as a real verdict.
fn failed_verification(error: &str) -> VerificationResult {
    let reasoning = format!("Verification failed due to error: {error}");
    let mut result = VerificationResult::new(false, 0.0, reasoning.clone());
    result.llm_response = Some(json!({
        "success": false,
        "confidence": 0.0,
        "reasoning": reasoning,
        "visual_evidence": "",
        "suggested_next_action": "",
        "error": error,
    }));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::conversation_log::ConversationLogger;
    use crate::llm::providers::scripted::ScriptedProvider;
    use crate::llm::types::CallConfig;
    use crate::perception::screenshot::testing::FakeCapture;

    fn verifier(provider: ScriptedProvider, capture: FakeCapture) -> (StepVerifier, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let cfg = CallConfig {
            model: "gpt-4o".into(),
            temperature: 0.1,
            max_tokens: 1000,
            json_mode: true,
        };
        let logger = Arc::new(ConversationLogger::disabled());
        let session = LlmSession::new(provider.clone(), cfg, logger);
        let analyzer = StateAnalyzer::new(session.clone());
        let verifier = StepVerifier::new(session, analyzer, Arc::new(capture), VerifierConfig::default());
        (verifier, provider)
    }

    fn step(run_dir: &Path, action_type: &str, completed: usize) -> StepContext {
        StepContext {
            step_description: "Open a new document".into(),
            action_type: action_type.into(),
            action_description: "key_press(\"cmd+n\")".into(),
            run_dir: run_dir.to_path_buf(),
            user_task: "Write hello in TextEdit".into(),
            completed_actions: (0..completed).map(|i| format!("action {i}")).collect(),
        }
    }

    const PASS: &str = r#"{"success": true, "confidence": 0.92, "reasoning": "A new window is visible", "visual_evidence": "Untitled window", "suggested_next_action": ""}"#;
    const FAIL: &str = r#"{"success": false, "confidence": 0.4, "reasoning": "No new window appeared", "visual_evidence": "", "suggested_next_action": "Try the File menu"}"#;
    const ANALYSIS: &str = r#"{"current_progress": "TextEdit open", "task_completed": false, "plan_update_needed": true, "plan_update_reason": "Use the menu", "obstacles": ["Shortcut ignored"]}"#;

    #[tokio::test]
    async fn simple_actions_skip_capture_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, provider) = verifier(ScriptedProvider::new(), FakeCapture::new(100, 100));
        let result = verifier.verify_step(&step(dir.path(), "wait", 10)).await;

        assert!(result.success);
        assert_eq!(result.confidence, 1.0);
        assert!(result.screenshot_path.is_none());
        assert!(!result.should_retry);
        assert!(result.plan_update.is_none());
        assert_eq!(provider.call_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn wait_descriptor_skips_verification_under_any_type() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, provider) = verifier(ScriptedProvider::new(), FakeCapture::new(100, 100));
        let mut pause = step(dir.path(), "pause", 3);
        pause.action_description = "wait(\"2\")".into();
        let result = verifier.verify_step(&pause).await;

        assert!(result.success);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn verified_step_attaches_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, provider) = verifier(ScriptedProvider::new().reply(PASS), FakeCapture::new(1200, 900));
        let result = verifier.verify_step(&step(dir.path(), "key_press", 2)).await;

        assert!(result.success);
        assert_eq!(result.confidence, 0.92);
        assert_eq!(result.retry_reason, "Step verified successfully");
        assert!(result.screenshot_path.as_deref().is_some_and(Path::exists));
        assert!(result.validation_prompt.unwrap().contains("STEP TO VERIFY: Open a new document"));
        assert!(result.plan_update.is_none());
        assert_eq!(provider.call_count(), 1);

        let (messages, cfg) = provider.request(0);
        assert!(cfg.json_mode);
        assert!(messages[1].content.has_image());
    }

    #[tokio::test]
    async fn failed_step_runs_state_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, provider) = verifier(
            ScriptedProvider::new().reply(FAIL).reply(ANALYSIS),
            FakeCapture::new(640, 480),
        );
        let result = verifier.verify_step(&step(dir.path(), "key_press", 1)).await;

        assert!(!result.success);
        assert!(result.should_retry);
        assert!(result.retry_reason.starts_with("Moderate confidence (0.4)"));
        let report = result.plan_update.unwrap();
        assert!(report.plan_update_needed);
        assert_eq!(report.obstacles, vec!["Shortcut ignored"]);
        assert_eq!(provider.call_count(), 2);
        assert!(provider.request_text(1).contains("CURRENT STEP: Open a new document"));
    }

    #[tokio::test]
    async fn long_running_success_is_reconciled() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, provider) = verifier(
            ScriptedProvider::new().reply(PASS).reply(ANALYSIS),
            FakeCapture::new(640, 480),
        );
        let result = verifier.verify_step(&step(dir.path(), "click", 6)).await;
        assert!(result.success);
        assert!(result.plan_update.is_some());
        assert_eq!(provider.call_count(), 2);

        let (verifier, provider) = verifier_with_threshold(PASS, 5);
        let result = verifier.verify_step(&step(dir.path(), "click", 5)).await;
        assert!(result.plan_update.is_none());
        assert_eq!(provider.call_count(), 1);
    }

    fn verifier_with_threshold(reply: &str, threshold: usize) -> (StepVerifier, Arc<ScriptedProvider>) {
        let (mut verifier, provider) = verifier(ScriptedProvider::new().reply(reply), FakeCapture::new(64, 64));
        verifier.config.state_analysis_after_actions = threshold;
        (verifier, provider)
    }

    #[tokio::test]
    async fn model_failure_synthesizes_response() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, _) = verifier(ScriptedProvider::new().fail("rate limited"), FakeCapture::new(64, 64));
        let result = verifier.verify_step(&step(dir.path(), "click", 0)).await;

        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert!(result.reasoning.contains("rate limited"));
        let response = result.llm_response.as_ref().unwrap();
        assert_eq!(response["success"], false);
        assert!(response["error"].as_str().unwrap().contains("rate limited"));
        assert!(result.retry_reason.starts_with("Low confidence"));
        // No reply left for the analyzer either, so its report is the degraded one.
        assert!(result.plan_update.unwrap().plan_update_needed);
    }

    #[tokio::test]
    async fn capture_failure_degrades_to_text_only() {
        let dir = tempfile::tempdir().unwrap();
        let (verifier, provider) = verifier(ScriptedProvider::new().reply(PASS), FakeCapture::failing());
        let result = verifier.verify_step(&step(dir.path(), "type", 0)).await;

        assert!(result.success);
        assert!(result.screenshot_path.is_none());
        assert!(!provider.request(0).0[1].content.has_image());
    }
}
