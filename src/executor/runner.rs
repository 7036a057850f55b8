use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::errors::{AgentlyError, AgentlyResult};

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Exported to the executor as `<env_prefix><KEY>` variables.
    #[serde(default)]
    pub test_data: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub execution_time_seconds: f64,
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TaskResult {
    pub fn success_rate(&self) -> f64 {
        if self.total_actions == 0 {
            return 0.0;
        }
        self.successful_actions as f64 / self.total_actions as f64
    }
}

/// Action counts reported by the executor on stdout.
#[derive(Debug, Deserialize)]
struct ExecutorReport {
    total_actions: u64,
    #[serde(default)]
    successful_actions: u64,
}

pub struct AutomationExecutor {
    config: ExecutorConfig,
}

impl AutomationExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Builds (when configured) and runs one task. Every failure, including a timeout, becomes a
    /// failed [`TaskResult`] carrying the elapsed time; nothing is retried here.
    pub async fn run_task(&self, task: &TaskRequest, timeout_override: Option<u64>) -> TaskResult {
        let timeout = timeout_override
            .or(task.timeout_seconds)
            .unwrap_or(self.config.default_timeout_secs);
        let start_time = Utc::now();
        let started = Instant::now();
        tracing::info!(task_id = %task.task_id, timeout, "starting task");

        let outcome = self.execute(task, timeout).await;
        let end_time = Utc::now();
        let execution_time_seconds = started.elapsed().as_secs_f64();

        let result = match outcome {
            Ok(report) => TaskResult {
                task_id: task.task_id.clone(),
                success: true,
                execution_time_seconds,
                total_actions: report.total_actions,
                successful_actions: report.successful_actions,
                failed_actions: report.total_actions.saturating_sub(report.successful_actions),
                error_message: None,
                start_time,
                end_time,
            },
            Err(e) => {
                let message = match e {
                    AgentlyError::Timeout(secs) => format!("Task timed out after {secs} seconds"),
                    other => other.to_string(),
                };
                tracing::error!(task_id = %task.task_id, error = %message, "task failed");
                TaskResult {
                    task_id: task.task_id.clone(),
                    success: false,
                    execution_time_seconds,
                    total_actions: 0,
                    successful_actions: 0,
                    failed_actions: 1,
                    error_message: Some(message),
                    start_time,
                    end_time,
                }
            }
        };
        tracing::info!(
            task_id = %result.task_id,
            success = result.success,
            elapsed_secs = result.execution_time_seconds,
            "task finished"
        );
        result
    }

    /// Runs tasks strictly one after another with the configured pause between them.
    pub async fn run_suite(&self, tasks: &[TaskRequest], timeout_override: Option<u64>) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            tracing::info!(task_id = %task.task_id, "running task {}/{}", i + 1, tasks.len());
            results.push(self.run_task(task, timeout_override).await);
            if i + 1 < tasks.len() && self.config.suite_pause_secs > 0 {
                tokio::time::sleep(Duration::from_secs(self.config.suite_pause_secs)).await;
            }
        }
        results
    }

    async fn execute(&self, task: &TaskRequest, timeout: u64) -> AgentlyResult<ExecutorReport> {
        if let Some(program) = &self.config.build_program {
            let mut build = self.command(program);
            build.args(&self.config.build_args);
            let output = run_with_timeout(build, self.config.build_timeout_secs)
                .await
                .map_err(|e| AgentlyError::Executor(format!("build step failed: {e}")))?;
            if !output.status.success() {
                return Err(AgentlyError::Executor(format!(
                    "build step failed ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        let mut cmd = self.command(&self.config.program);
        cmd.args(&self.config.args)
            .arg("--task")
            .arg(&task.description)
            .args(&self.config.format_args);
        for (key, value) in &task.test_data {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            cmd.env(format!("{}{}", self.config.env_prefix, key.to_uppercase()), value);
        }

        let output = run_with_timeout(cmd, timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AgentlyError::Executor(if stderr.is_empty() {
                format!("executor exited with {}", output.status)
            } else {
                stderr
            }));
        }
        parse_report(&String::from_utf8_lossy(&output.stdout))
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Runs `cmd` to completion, killing it when `timeout_secs` elapses.
async fn run_with_timeout(mut cmd: Command, timeout_secs: u64) -> AgentlyResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd
        .spawn()
        .map_err(|e| AgentlyError::Executor(format!("failed to spawn executor: {e}")))?;
    match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => {
            tracing::warn!(timeout_secs, "command timed out, killing");
            Err(AgentlyError::Timeout(timeout_secs))
        }
    }
}

/// The executor may print progress lines before its JSON report; the report starts at the first
/// line beginning with `{`.
fn parse_report(stdout: &str) -> AgentlyResult<ExecutorReport> {
    let trimmed = stdout.trim();
    if let Ok(report) = serde_json::from_str(trimmed) {
        return Ok(report);
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    if let Some(start) = lines.iter().position(|l| l.trim_start().starts_with('{')) {
        if let Ok(report) = serde_json::from_str(&lines[start..].join("\n")) {
            return Ok(report);
        }
    }
    let preview: String = trimmed.chars().take(200).collect();
    Err(AgentlyError::Executor(format!(
        "unparsed executor output: {preview:?}"
    )))
}
