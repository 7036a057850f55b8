pub mod retry_policy;
pub mod state;
pub mod state_analyzer;
pub mod verifier;
