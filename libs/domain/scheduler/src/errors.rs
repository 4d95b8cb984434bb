use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] kh_store::StoreError),

    #[error("math error: {0}")]
    Math(#[from] kh_core_math::MathError),

    #[error("no binary compatible with agent and job: {0}")]
    Incompatible(String),

    #[error("illegal task transition: {0}")]
    IllegalTransition(#[from] kh_models::task::IllegalTransition),

    #[error("job {0} has no schedulable layer")]
    NoSchedulableLayer(uuid::Uuid),

    #[error("task_status_update carried a non-terminal status: {0:?}")]
    NotATerminalStatus(kh_models::TaskStatus),
}
