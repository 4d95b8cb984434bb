use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] kh_store::StoreError),

    #[error(transparent)]
    Scheduler(#[from] kh_scheduler::SchedulerError),

    #[error("agent {0} is unreachable")]
    AgentUnreachable(i64),

    #[error("malformed message: {0}")]
    Validation(String),
}
