pub mod conversation_log;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod session;
pub mod types;
