//! Queued, bounded, cancellable execution of long-running PVE
//! operations, tracked by their opaque UPID.
//!
//! At most one task is active per `(node, vmid)`; everything else for
//! that key waits FIFO. A global semaphore caps how many tasks run at
//! once across all keys. `TaskManager` is always used behind an `Arc`
//! so spawned poll loops can call back into it.

mod task;

pub use task::{Task, TaskEvent, TaskStatus};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tracing::warn;
use uuid::Uuid;

use crate::error::PveError;
use crate::pve::{GuestKind, PveClient, Upid};

pub type Operation = Box<dyn FnOnce() -> BoxFuture<'static, Result<Upid, PveError>> + Send>;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const NOTIFY_CAPACITY: usize = 256;

type Key = (String, u32);

pub struct TaskManager {
    pve: PveClient,
    tasks: Mutex<HashMap<Uuid, Task>>,
    operations: Mutex<HashMap<Uuid, Operation>>,
    active_key: Mutex<HashMap<Key, Uuid>>,
    queue: Mutex<HashMap<Key, VecDeque<Uuid>>>,
    cancel_requested: Mutex<HashSet<Uuid>>,
    semaphore: Option<Arc<Semaphore>>,
    notify: broadcast::Sender<TaskEvent>,
}

impl TaskManager {
    /// `max_running == 0` means unlimited concurrency.
    pub fn new(pve: PveClient, max_running: usize) -> Arc<Self> {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Arc::new(Self {
            pve,
            tasks: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            active_key: Mutex::new(HashMap::new()),
            queue: Mutex::new(HashMap::new()),
            cancel_requested: Mutex::new(HashSet::new()),
            semaphore: if max_running == 0 { None } else { Some(Arc::new(Semaphore::new(max_running))) },
            notify,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.notify.subscribe()
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().get(&id).cloned()
    }

    pub fn enqueue(
        self: &Arc<Self>,
        task_type: String,
        description: String,
        target_node: String,
        target_vmid: u32,
        target_kind: GuestKind,
        operation: Operation,
    ) -> Uuid {
        let task = Task::new(task_type, description, target_node, target_vmid, target_kind);
        let id = task.id;
        let key = task.key();
        self.tasks.lock().insert(id, task);
        self.operations.lock().insert(id, operation);
        self.queue.lock().entry(key.clone()).or_default().push_back(id);
        self.try_promote(&key);
        self.emit(id);
        id
    }

    /// Queued tasks are removed outright; a running task with a known
    /// UPID gets a `stop_task` call and finalizes once the poll loop
    /// observes the cancellation; a task whose operation hasn't
    /// produced a UPID yet cannot be cancelled.
    pub fn cancel(self: &Arc<Self>, id: Uuid) -> Result<(), PveError> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&id).ok_or_else(|| PveError::NotFound(id.to_string()))?;

        match task.status {
            TaskStatus::Queued => {
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(chrono::Utc::now());
                let key = task.key();
                drop(tasks);
                if let Some(q) = self.queue.lock().get_mut(&key) {
                    q.retain(|queued_id| *queued_id != id);
                }
                self.operations.lock().remove(&id);
                self.emit(id);
                Ok(())
            }
            TaskStatus::Running => {
                let Some(upid) = task.upid.clone() else {
                    return Err(PveError::Busy("cannot cancel yet".into()));
                };
                let node = task.target_node.clone();
                drop(tasks);
                self.cancel_requested.lock().insert(id);
                let pve = self.pve.clone();
                tokio::spawn(async move {
                    if let Err(err) = pve.stop_task(&node, &upid).await {
                        warn!(%err, "stop_task request failed");
                    }
                });
                Ok(())
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => Ok(()),
        }
    }

    fn try_acquire(&self) -> Option<Option<OwnedSemaphorePermit>> {
        match &self.semaphore {
            None => Some(None),
            Some(sem) => Arc::clone(sem).try_acquire_owned().ok().map(Some),
        }
    }

    fn try_promote(self: &Arc<Self>, key: &Key) {
        let mut active = self.active_key.lock();
        if active.contains_key(key) {
            return;
        }
        let next_id = {
            let mut queue = self.queue.lock();
            let Some(q) = queue.get_mut(key) else { return };
            let next = q.pop_front();
            if q.is_empty() {
                queue.remove(key);
            }
            next
        };
        let Some(next_id) = next_id else { return };
        let Some(permit) = self.try_acquire() else {
            self.queue.lock().entry(key.clone()).or_default().push_front(next_id);
            return;
        };
        active.insert(key.clone(), next_id);
        drop(active);
        self.spawn_run(next_id, permit);
    }

    /// Re-scans every key with a non-empty queue. Needed because
    /// freeing a global semaphore permit may unblock a task under a
    /// *different* key than the one that just completed.
    fn promote_pending(self: &Arc<Self>) {
        let keys: Vec<Key> = self.queue.lock().keys().cloned().collect();
        for key in keys {
            self.try_promote(&key);
        }
    }

    fn spawn_run(self: &Arc<Self>, id: Uuid, permit: Option<OwnedSemaphorePermit>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(id, permit).await;
        });
    }

    async fn run(self: Arc<Self>, id: Uuid, permit: Option<OwnedSemaphorePermit>) {
        self.mark_running(id);
        let operation = self.operations.lock().remove(&id);
        let Some(operation) = operation else {
            self.finish(id, TaskStatus::Failed, Some("operation missing".into()), permit);
            return;
        };

        match operation().await {
            Err(e) => self.finish(id, TaskStatus::Failed, Some(e.to_string()), permit),
            Ok(upid) if upid.as_ref().is_empty() => {
                self.finish(id, TaskStatus::Completed, None, permit)
            }
            Ok(upid) => {
                self.set_upid(id, upid.clone());
                self.poll_until_terminal(id, upid, permit).await;
            }
        }
    }

    async fn poll_until_terminal(
        self: &Arc<Self>,
        id: Uuid,
        upid: Upid,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let Some(node) = self.tasks.lock().get(&id).map(|t| t.target_node.clone()) else {
            return;
        };
        loop {
            if self.cancel_requested.lock().remove(&id) {
                self.finish(id, TaskStatus::Cancelled, None, permit);
                return;
            }

            match self.pve.task_status(&node, &upid).await {
                Ok(status) if status.status == "stopped" => {
                    if status.exitstatus.as_deref() == Some("OK") {
                        self.finish(id, TaskStatus::Completed, None, permit);
                    } else {
                        self.finish(id, TaskStatus::Failed, status.exitstatus, permit);
                    }
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    // Transient poll failures (including a client-resolver
                    // failure) do not terminate the task; retry next tick.
                    warn!(%err, "task status poll failed, will retry");
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn mark_running(&self, id: Uuid) {
        if let Some(task) = self.tasks.lock().get_mut(&id) {
            task.status = TaskStatus::Running;
            task.started_at = Some(chrono::Utc::now());
        }
        self.emit(id);
    }

    fn set_upid(&self, id: Uuid, upid: Upid) {
        if let Some(task) = self.tasks.lock().get_mut(&id) {
            task.upid = Some(upid);
        }
    }

    fn finish(
        self: &Arc<Self>,
        id: Uuid,
        status: TaskStatus,
        error: Option<String>,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        drop(permit);
        let key = {
            let mut tasks = self.tasks.lock();
            let Some(task) = tasks.get_mut(&id) else { return };
            task.status = status;
            task.error = error;
            task.finished_at = Some(chrono::Utc::now());
            task.key()
        };
        self.cancel_requested.lock().remove(&id);
        self.active_key.lock().remove(&key);
        self.emit(id);
        self.promote_pending();
    }

    fn emit(&self, id: Uuid) {
        if let Some(task) = self.tasks.lock().get(&id) {
            let _ = self.notify.send(TaskEvent { task_id: id, status: task.status });
        }
    }
}
