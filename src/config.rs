use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{AgentlyError, AgentlyResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderEntry {
                display_name: "OpenAI".to_string(),
                api_base: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                api_key: None,
            },
        );
        Self {
            active_provider: "openai".to_string(),
            providers,
            roles: RolesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Optional API key stored in config.toml (env vars take precedence).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps pipeline roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Plan generation, recovery and element selection (text only).
    pub planning: Option<RoleEntry>,
    /// Step verification and state analysis (screenshot attached).
    pub vision: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
    /// Overrides the provider-level completion budget for this role.
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Action types that are accepted without a screenshot or model call.
    #[serde(default = "default_simple_actions")]
    pub simple_action_types: Vec<String>,
    #[serde(default = "default_max_width")]
    pub max_screenshot_width: u32,
    #[serde(default = "default_max_height")]
    pub max_screenshot_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// State analysis also runs on successful steps once more than this many actions completed.
    #[serde(default = "default_analysis_after")]
    pub state_analysis_after_actions: usize,
    /// Program and arguments used to capture the screen; the output path is appended.
    #[serde(default = "default_capture_command")]
    pub capture_command: Vec<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            simple_action_types: default_simple_actions(),
            max_screenshot_width: default_max_width(),
            max_screenshot_height: default_max_height(),
            jpeg_quality: default_jpeg_quality(),
            state_analysis_after_actions: default_analysis_after(),
            capture_command: default_capture_command(),
        }
    }
}

fn default_simple_actions() -> Vec<String> {
    vec!["wait".into(), "delay".into(), "sleep".into()]
}

fn default_max_width() -> u32 {
    800
}

fn default_max_height() -> u32 {
    600
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_analysis_after() -> usize {
    5
}

fn default_capture_command() -> Vec<String> {
    vec!["screencapture".into(), "-x".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Root directory for conversation transcripts. Transcripts are disabled when unset.
    #[serde(default)]
    pub conversation_log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_program")]
    pub program: String,
    /// Arguments placed before `--task <description>`.
    #[serde(default = "default_executor_args")]
    pub args: Vec<String>,
    #[serde(default = "default_format_args")]
    pub format_args: Vec<String>,
    #[serde(default)]
    pub build_program: Option<String>,
    #[serde(default)]
    pub build_args: Vec<String>,
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_task_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_suite_pause")]
    pub suite_pause_secs: u64,
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: default_executor_program(),
            args: default_executor_args(),
            format_args: default_format_args(),
            build_program: None,
            build_args: Vec::new(),
            build_timeout_secs: default_build_timeout(),
            default_timeout_secs: default_task_timeout(),
            suite_pause_secs: default_suite_pause(),
            env_prefix: default_env_prefix(),
            working_dir: None,
        }
    }
}

fn default_executor_program() -> String {
    "swift".into()
}

fn default_executor_args() -> Vec<String> {
    vec!["run".into(), "agently-runner".into()]
}

fn default_format_args() -> Vec<String> {
    vec!["--format".into(), "json".into()]
}

fn default_build_timeout() -> u64 {
    60
}

fn default_task_timeout() -> u64 {
    300
}

fn default_suite_pause() -> u64 {
    2
}

fn default_env_prefix() -> String {
    "AGENTLY_TEST_".into()
}

fn resolve_config_path() -> AgentlyResult<PathBuf> {
    if let Ok(explicit) = std::env::var("AGENTLY_CONFIG") {
        let candidate = PathBuf::from(explicit);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found via AGENTLY_CONFIG");
            return Ok(candidate);
        }
        return Err(AgentlyError::Config(format!(
            "AGENTLY_CONFIG points to missing file {}",
            candidate.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("agently").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(AgentlyError::Config(
        "config.toml not found via AGENTLY_CONFIG, next to executable, in working directory or user config dir".into(),
    ))
}

pub fn parse_config(content: &str) -> AgentlyResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

pub fn load_config() -> AgentlyResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.llm.active_provider, "openai");
        assert_eq!(cfg.verifier.state_analysis_after_actions, 5);
        assert_eq!(cfg.verifier.simple_action_types, vec!["wait", "delay", "sleep"]);
        assert_eq!(cfg.executor.build_timeout_secs, 60);
        assert_eq!(cfg.executor.suite_pause_secs, 2);
        assert!(cfg.logging.conversation_log_dir.is_none());
    }

    #[test]
    fn roles_and_overrides_parse() {
        let cfg = parse_config(
            r#"
            [llm]
            active_provider = "local"

            [llm.providers.local]
            display_name = "Local"
            api_base = "http://localhost:8080/v1/chat/completions"
            model = "qwen"

            [llm.roles.vision]
            provider = "local"
            model = "qwen-vl"
            max_tokens = 1000

            [verifier]
            state_analysis_after_actions = 8
            capture_command = ["grim"]

            [logging]
            conversation_log_dir = "/tmp/agently"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.llm.providers["local"].temperature, 0.1);
        assert_eq!(cfg.llm.providers["local"].max_tokens, 2000);
        let vision = cfg.llm.roles.vision.unwrap();
        assert_eq!(vision.model, "qwen-vl");
        assert_eq!(vision.max_tokens, Some(1000));
        assert!(cfg.llm.roles.planning.is_none());
        assert_eq!(cfg.verifier.state_analysis_after_actions, 8);
        assert_eq!(cfg.verifier.capture_command, vec!["grim"]);
        assert_eq!(cfg.verifier.max_screenshot_width, 800);
        assert_eq!(
            cfg.logging.conversation_log_dir,
            Some(PathBuf::from("/tmp/agently"))
        );
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = parse_config("[llm\nactive_provider = 1").unwrap_err();
        assert!(matches!(err, AgentlyError::TomlDe(_)));
    }
}
