use tokio::io::AsyncReadExt;

use agently::commands::{Agent, Request};
use agently::config::{self, AppConfig};
use agently::errors::AgentlyResult;
use agently::llm::registry::ProviderRegistry;

#[tokio::main]
async fn main() {
    // stdout carries only the JSON result.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "request failed");
        println!("{}", serde_json::json!({ "error": e }));
        std::process::exit(1);
    }
}

async fn run() -> AgentlyResult<()> {
    let config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "no usable config; using defaults");
            AppConfig::default()
        }
    };

    let registry = ProviderRegistry::from_config(&config);
    for id in registry.missing_credentials() {
        tracing::warn!(provider = %id, "no API key found; model calls will fail");
    }
    let agent = Agent::from_config(&config, &registry)?;

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let request: Request = serde_json::from_str(&input)?;

    let response = agent.handle(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
