use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentlyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Missing required variable: {0}")]
    MissingVariable(String),

    #[error("Empty response from LLM")]
    EmptyResponse,

    /// The model output could not be turned into a JSON object even after repair.
    /// Both texts are kept so the failure can be diagnosed from logs.
    #[error("Invalid JSON response: {reason}")]
    InvalidResponse {
        reason: String,
        original: String,
        repaired: String,
    },

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl serde::Serialize for AgentlyError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AgentlyResult<T> = Result<T, AgentlyError>;
