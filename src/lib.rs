pub mod agent_engine;
pub mod commands;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;
pub mod planner;
