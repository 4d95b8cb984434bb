//! The agent's local view of the single task it may run at a time
//! (spec.md §4.7). An agent never runs more than one task concurrently;
//! this tracks that slot independently of whatever the controller
//! believes, so a dropped connection doesn't lose track of in-flight
//! work — `completion_pending` survives a reconnect and is resent
//! until acknowledged.

use kh_protocol::TaskAssignmentPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentTaskState {
    Idle,
    Running,
    /// Execution finished locally; the terminal status update hasn't
    /// been acknowledged by the controller yet.
    Completing,
    Failed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct LocalTask {
    pub assignment: TaskAssignmentPayload,
    pub state: AgentTaskState,
    pub keyspace_processed: u64,
    pub crack_count: u64,
    pub error_message: Option<String>,
    /// Set once a terminal outcome is known locally; cleared only once
    /// the controller has ack'd the status update that reports it.
    pub completion_pending: bool,
}

impl LocalTask {
    pub fn new(assignment: TaskAssignmentPayload) -> Self {
        LocalTask {
            assignment,
            state: AgentTaskState::Idle,
            keyspace_processed: 0,
            crack_count: 0,
            error_message: None,
            completion_pending: false,
        }
    }
}

/// Single-task slot manager. A plain struct rather than a trait since
/// there is exactly one implementation and one caller (`connection.rs`,
/// under a `Mutex`).
#[derive(Debug, Default)]
pub struct TaskSlot {
    current: Option<LocalTask>,
}

impl TaskSlot {
    pub fn new() -> Self {
        TaskSlot { current: None }
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<&LocalTask> {
        self.current.as_ref()
    }

    /// Accepts a new assignment. Rejects if a task is already occupying
    /// the slot — the controller should never double-assign, but a
    /// stale in-flight message during a reconnect race is possible.
    pub fn accept(&mut self, assignment: TaskAssignmentPayload) -> Result<(), &'static str> {
        if self.current.is_some() {
            return Err("task slot already occupied");
        }
        self.current = Some(LocalTask::new(assignment));
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), &'static str> {
        let task = self.current.as_mut().ok_or("no task to start")?;
        if task.state != AgentTaskState::Idle {
            return Err("task already started");
        }
        task.state = AgentTaskState::Running;
        Ok(())
    }

    pub fn record_progress(&mut self, keyspace_processed: u64, new_cracks: u64) -> Result<(), &'static str> {
        let task = self.current.as_mut().ok_or("no task running")?;
        task.keyspace_processed = keyspace_processed;
        task.crack_count += new_cracks;
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), &'static str> {
        let task = self.current.as_mut().ok_or("no task to complete")?;
        task.state = AgentTaskState::Completing;
        task.completion_pending = true;
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), &'static str> {
        let task = self.current.as_mut().ok_or("no task to fail")?;
        task.state = AgentTaskState::Failed;
        task.error_message = Some(message.into());
        task.completion_pending = true;
        Ok(())
    }

    pub fn mark_stopped(&mut self) -> Result<(), &'static str> {
        let task = self.current.as_mut().ok_or("no task to stop")?;
        task.state = AgentTaskState::Stopped;
        task.completion_pending = true;
        Ok(())
    }

    /// Called once the controller acks the terminal status update —
    /// frees the slot for the next assignment.
    pub fn clear_if_acknowledged(&mut self) {
        if let Some(task) = &self.current {
            if !task.completion_pending {
                self.current = None;
            }
        }
    }

    pub fn acknowledge_completion(&mut self) {
        if let Some(task) = self.current.as_mut() {
            task.completion_pending = false;
        }
        self.clear_if_acknowledged();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn assignment() -> TaskAssignmentPayload {
        TaskAssignmentPayload {
            task_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            hashlist_id: 1,
            attack_mode: 0,
            hash_type: 0,
            binary_id: 1,
            binary_version_pattern: "default".into(),
            wordlist_paths: vec![],
            rule_paths: vec![],
            rule_chunk_path: None,
            mask: None,
            keyspace_start: 0,
            keyspace_end: 1000,
            effective_keyspace_start: 0,
            effective_keyspace_end: 1000,
            rule_start_index: None,
            rule_end_index: None,
            extra_args: String::new(),
        }
    }

    #[test]
    fn accept_then_double_accept_is_rejected() {
        let mut slot = TaskSlot::new();
        slot.accept(assignment()).unwrap();
        assert!(slot.accept(assignment()).is_err());
    }

    #[test]
    fn completion_pending_survives_until_acknowledged() {
        let mut slot = TaskSlot::new();
        slot.accept(assignment()).unwrap();
        slot.start().unwrap();
        slot.mark_completed().unwrap();
        assert!(slot.current().unwrap().completion_pending);
        slot.clear_if_acknowledged();
        assert!(slot.current().is_some(), "not cleared before ack");
        slot.acknowledge_completion();
        assert!(slot.current().is_none());
    }

    #[test]
    fn record_progress_requires_active_task() {
        let mut slot = TaskSlot::new();
        assert!(slot.record_progress(10, 0).is_err());
    }
}
