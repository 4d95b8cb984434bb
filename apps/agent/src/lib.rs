pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod mock_executor;
pub mod progress_pipeline;
pub mod task_state_manager;

pub use config::{AgentConfig, Credentials};
pub use error::AgentError;
