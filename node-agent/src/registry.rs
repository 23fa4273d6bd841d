use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::{debug, info};

use shared_types::{JobId, Language, StartupToken, Status, WorkerId, WorkerType};

use crate::worker::{KillState, Worker};

/// The node's workers, keyed by id. Holds the owning reference to each
/// worker; grace timers and in-flight RPC callbacks hold their own.
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, Arc<Worker>>,
    /// Runtime that grace-period timers run on.
    io: Handle,
}

impl WorkerRegistry {
    pub fn new(io: Handle) -> Arc<Self> {
        Arc::new(Self {
            workers: DashMap::new(),
            io,
        })
    }

    pub fn register(&self, worker: Arc<Worker>) -> Result<(), Status> {
        let worker_id = worker.worker_id();
        match self.workers.entry(worker_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Status::already_exists(format!(
                "worker {worker_id} is already registered"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(worker);
                info!(%worker_id, "worker registered");
                Ok(())
            }
        }
    }

    pub fn get(&self, worker_id: &WorkerId) -> Option<Arc<Worker>> {
        self.workers.get(worker_id).map(|w| Arc::clone(w.value()))
    }

    pub fn find_by_startup_token(&self, token: StartupToken) -> Option<Arc<Worker>> {
        self.workers
            .iter()
            .find(|w| w.startup_token() == token)
            .map(|w| Arc::clone(w.value()))
    }

    /// Drop the registry's reference. Does not touch a pending grace timer.
    pub fn remove(&self, worker_id: &WorkerId) -> Option<Arc<Worker>> {
        let removed = self.workers.remove(worker_id).map(|(_, w)| w);
        if removed.is_some() {
            info!(%worker_id, "worker removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Start terminating one worker. `Ok(false)` means it was already dying.
    pub fn kill(&self, worker_id: &WorkerId, force: bool) -> Result<bool, Status> {
        let worker = self
            .get(worker_id)
            .ok_or_else(|| Status::not_found(format!("worker {worker_id} is not registered")))?;
        Ok(worker.kill_async(&self.io, force))
    }

    /// Returns how many workers this call started killing.
    pub fn kill_all(&self, force: bool) -> usize {
        self.workers()
            .iter()
            .filter(|w| w.kill_async(&self.io, force))
            .count()
    }

    pub fn notify_gcs_restart_all(&self) {
        let workers = self.workers();
        info!(count = workers.len(), "notifying workers of GCS restart");
        for worker in workers {
            worker.async_notify_gcs_restart();
        }
    }

    fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.iter().map(|w| Arc::clone(w.value())).collect()
    }

    /// Remove workers whose termination has begun and whose process is gone.
    pub fn reap_exited(&self) -> Vec<WorkerId> {
        let exited: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|w| w.is_dead() && w.process().map_or(true, |p| !p.is_alive()))
            .map(|w| *w.key())
            .collect();
        for worker_id in &exited {
            self.remove(worker_id);
        }
        exited
    }

    /// Background task: sweep exited workers out of the registry.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration) {
        loop {
            sleep(interval).await;
            let reaped = self.reap_exited();
            if !reaped.is_empty() {
                debug!(count = reaped.len(), "reaped exited workers");
            }
        }
    }

    /// Snapshot of all workers for the status endpoint.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let now = Utc::now();
        let mut out: Vec<WorkerSnapshot> = self
            .workers
            .iter()
            .map(|entry| {
                let w = entry.value();
                WorkerSnapshot {
                    worker_id: w.worker_id(),
                    pid: w.process().map(|p| p.id()),
                    language: w.language(),
                    worker_type: w.worker_type(),
                    port: w.port(),
                    job_id: w.assigned_job_id(),
                    assignment: w.task_or_actor_id_debug_string(),
                    kill_state: w.kill_state(),
                    blocked: w.is_blocked(),
                    busy_secs: w
                        .task_assign_time()
                        .filter(|_| !w.assigned_task_id().is_nil())
                        .map(|t| (now - t).num_seconds()),
                }
            })
            .collect();
        out.sort_by_key(|s| s.worker_id);
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: WorkerId,
    pub pid: Option<u32>,
    pub language: Language,
    pub worker_type: WorkerType,
    pub port: i32,
    pub job_id: JobId,
    pub assignment: String,
    pub kill_state: KillState,
    pub blocked: bool,
    /// Seconds since the current task was assigned.
    pub busy_secs: Option<i64>,
}
