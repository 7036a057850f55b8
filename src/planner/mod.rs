pub mod action;
pub mod engine;
pub mod json_repair;
pub mod prompts;
pub mod types;
pub mod ui_summary;
