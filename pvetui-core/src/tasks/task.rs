use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::pve::{GuestKind, Upid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub upid: Option<Upid>,
    /// Short operation kind, e.g. `"start"`, `"migrate"`, `"destroy"` —
    /// the PVE task-log "type" column, distinct from `description`.
    pub task_type: String,
    pub description: String,
    pub target_node: String,
    pub target_vmid: u32,
    pub target_kind: GuestKind,
    pub status: TaskStatus,
    /// `0.0..=1.0` fraction of completion when known. PVE's task-status
    /// endpoint (`TaskStatusRaw`) exposes no numeric progress, only a
    /// terminal/non-terminal `status` string, so this stays `None` for
    /// every task polled through `task_status` today; it exists so a
    /// future operation with a real progress source (e.g. backup
    /// percentage parsed from the task log) has somewhere to report it.
    pub progress: Option<f32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        task_type: String,
        description: String,
        target_node: String,
        target_vmid: u32,
        target_kind: GuestKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            upid: None,
            task_type,
            description,
            target_node,
            target_vmid,
            target_kind,
            status: TaskStatus::Queued,
            progress: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn key(&self) -> (String, u32) {
        (self.target_node.clone(), self.target_vmid)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Best-effort notification fan-out. Subscribers must tolerate
/// spurious or coalesced updates.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub status: TaskStatus,
}
