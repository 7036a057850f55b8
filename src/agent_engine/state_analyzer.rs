use std::path::Path;

use crate::agent_engine::state::StateReport;
use crate::errors::AgentlyResult;
use crate::llm::conversation_log::ConversationKind;
use crate::llm::session::LlmSession;
use crate::llm::types::ChatMessage;
use crate::perception::screenshot::image_data_url;
use crate::planner::json_repair::parse_json_object;
use crate::planner::prompts::{ANALYSIS_SYSTEM, STATE_ANALYSIS};

const RECENT_ACTIONS: usize = 5;

/// Reconciles overall task progress with what is on screen.
pub struct StateAnalyzer {
    session: LlmSession,
}

impl StateAnalyzer {
    pub fn new(session: LlmSession) -> Self {
        Self { session }
    }

    /// Never fails: a broken analysis yields [`StateReport::degraded`].
    /// The report is also saved as `state_analysis_<epoch>.json` in `run_dir` when possible.
    pub async fn analyze_state_and_suggest_plan(
        &self,
        user_task: &str,
        current_step: &str,
        completed_actions: &[String],
        screenshot: Option<&Path>,
        run_dir: &Path,
    ) -> StateReport {
        tracing::info!(task = %user_task, completed = completed_actions.len(), "analyzing task state");
        let report = match self
            .try_analyze(user_task, current_step, completed_actions, screenshot)
            .await
        {
            Ok(report) => {
                tracing::info!(
                    task_completed = report.task_completed,
                    plan_update_needed = report.plan_update_needed,
                    "state analysis complete"
                );
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "state analysis failed");
                StateReport::degraded(&e.to_string())
            }
        };
        save_report(&report, run_dir).await;
        report
    }

    async fn try_analyze(
        &self,
        user_task: &str,
        current_step: &str,
        completed_actions: &[String],
        screenshot: Option<&Path>,
    ) -> AgentlyResult<StateReport> {
        let recent = summarize_recent_actions(completed_actions);
        let prompt = STATE_ANALYSIS.format(&[
            ("user_task", user_task),
            ("current_step", current_step),
            ("completed_actions", recent.as_str()),
        ])?;

        let image = match screenshot {
            Some(path) => match image_data_url(path).await {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "analysis continues without screenshot");
                    None
                }
            },
            None => None,
        };

        let messages = vec![
            ChatMessage::system(ANALYSIS_SYSTEM.format(&[])?),
            ChatMessage::user_with_image(prompt, image),
        ];
        let response = self
            .session
            .exchange(ConversationKind::StateAnalysis, messages)
            .await?;
        let data = parse_json_object(&response)?;
        let mut report: StateReport = serde_json::from_value(serde_json::Value::Object(data))?;
        report.completion_confidence = report.completion_confidence.clamp(0.0, 1.0);
        report.confidence = report.confidence.clamp(0.0, 1.0);
        Ok(report)
    }
}

/// Numbered list of the last few completed actions, oldest first.
pub fn summarize_recent_actions(completed_actions: &[String]) -> String {
    if completed_actions.is_empty() {
        return "No actions completed yet".into();
    }
    let start = completed_actions.len().saturating_sub(RECENT_ACTIONS);
    completed_actions[start..]
        .iter()
        .enumerate()
        .map(|(i, action)| format!("{}. {action}", start + i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn save_report(report: &StateReport, run_dir: &Path) {
    let path = run_dir.join(format!(
        "state_analysis_{}.json",
        chrono::Utc::now().timestamp()
    ));
    let written = match serde_json::to_vec_pretty(report) {
        Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = written {
        tracing::warn!(path = %path.display(), error = %e, "failed to save state analysis");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::conversation_log::ConversationLogger;
    use crate::llm::providers::scripted::ScriptedProvider;
    use crate::llm::types::CallConfig;

    fn analyzer(provider: ScriptedProvider) -> (StateAnalyzer, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let cfg = CallConfig {
            model: "gpt-4o".into(),
            temperature: 0.1,
            max_tokens: 1000,
            json_mode: true,
        };
        let session = LlmSession::new(provider.clone(), cfg, Arc::new(ConversationLogger::disabled()));
        (StateAnalyzer::new(session), provider)
    }

    fn actions(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("step {i}")).collect()
    }

    #[test]
    fn only_the_last_five_actions_are_summarized() {
        let summary = summarize_recent_actions(&actions(7));
        assert_eq!(summary, "3. step 3\n4. step 4\n5. step 5\n6. step 6\n7. step 7");
        assert_eq!(summarize_recent_actions(&[]), "No actions completed yet");
    }

    #[tokio::test]
    async fn parses_report_and_saves_it() {
        let (analyzer, provider) = analyzer(ScriptedProvider::new().reply(
            r#"{
                "current_progress": "Document open",
                "remaining_work": "Type the greeting",
                "task_completed": false,
                "completion_confidence": 0.4,
                "approach_working": true,
                "suggested_next_actions": [{"action": "type(text_1, \"hi\")", "description": "enter greeting", "priority": "high"}],
                "plan_update_needed": false,
                "plan_update_reason": "",
                "obstacles": [],
                "confidence": 0.8
            }"#,
        ));
        let dir = tempfile::tempdir().unwrap();
        let report = analyzer
            .analyze_state_and_suggest_plan("Write hi in TextEdit", "Open document", &actions(6), None, dir.path())
            .await;

        assert_eq!(report.remaining_work, "Type the greeting");
        assert!(report.approach_working);
        assert_eq!(report.suggested_next_actions[0].priority, "high");

        let prompt = provider.request_text(0);
        assert!(prompt.contains("USER TASK: Write hi in TextEdit"));
        assert!(prompt.contains("6. step 6"));
        assert!(!prompt.contains("1. step 1"));

        let saved: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].starts_with("state_analysis_"));
    }

    #[tokio::test]
    async fn null_fields_keep_the_model_answer() {
        let (analyzer, _) = analyzer(ScriptedProvider::new().reply(
            r#"{"current_progress": "Email sent", "remaining_work": "", "task_completed": true,
                "completion_confidence": 0.95, "approach_working": true, "suggested_next_actions": [],
                "plan_update_needed": false, "plan_update_reason": null, "obstacles": null, "confidence": 0.9}"#,
        ));
        let dir = tempfile::tempdir().unwrap();
        let report = analyzer
            .analyze_state_and_suggest_plan("Send the email", "Click send", &actions(3), None, dir.path())
            .await;
        assert!(report.task_completed);
        assert!(!report.plan_update_needed);
        assert!(report.obstacles.is_empty());
        assert_eq!(report.plan_update_reason, "");
        assert_eq!(report.completion_confidence, 0.95);
    }

    #[tokio::test]
    async fn failure_degrades_report() {
        let (analyzer, _) = analyzer(ScriptedProvider::new().reply("I cannot tell"));
        let dir = tempfile::tempdir().unwrap();
        let report = analyzer
            .analyze_state_and_suggest_plan("task", "step", &[], None, dir.path())
            .await;
        assert!(!report.task_completed);
        assert!(report.plan_update_needed);
        assert!(report.obstacles[0].contains("Invalid JSON response"));
    }

    #[tokio::test]
    async fn unreadable_screenshot_falls_back_to_text() {
        let (analyzer, provider) = analyzer(ScriptedProvider::new().reply(r#"{"task_completed": true}"#));
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.jpg");
        let report = analyzer
            .analyze_state_and_suggest_plan("task", "step", &[], Some(&missing), dir.path())
            .await;
        assert!(report.task_completed);
        assert!(!provider.request(0).0[1].content.has_image());
    }
}
