//! Thin dispatcher-facing wrapper over `kh_core_math::version` (C1).

use kh_core_math::version::{resolve, ActiveBinary, VersionPattern};

use crate::errors::SchedulerError;

#[tracing::instrument(skip(active_binaries))]
pub fn resolve_binary(
    agent_pattern: &VersionPattern,
    job_pattern: &VersionPattern,
    active_binaries: &[ActiveBinary],
) -> Result<i64, SchedulerError> {
    resolve(agent_pattern, job_pattern, active_binaries).map_err(|e| match e {
        kh_core_math::MathError::Incompatible { agent, job } => {
            SchedulerError::Incompatible(format!("agent={agent} job={job}"))
        }
        other => SchedulerError::Math(other),
    })
}
