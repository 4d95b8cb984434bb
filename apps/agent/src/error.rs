use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("credentials file error: {0}")]
    Credentials(#[from] std::io::Error),

    #[error("no active task to {0}")]
    NoActiveTask(&'static str),

    #[error("illegal local task transition: {0}")]
    IllegalTransition(String),

    #[error("controller closed the connection: {0}")]
    ConnectionClosed(String),
}
