//! Worker - the node agent's record of one worker process
//!
//! A `Worker` is created when the agent sees a new worker process start and
//! lives in the [`WorkerRegistry`](crate::registry::WorkerRegistry) until the
//! process is confirmed dead. It is shared (`Arc<Worker>`) between the agent's
//! scheduling code and callbacks running on the I/O runtime: grace-period
//! timers and RPC completions.
//!
//! ## Field discipline
//!
//! - `worker_id`, language, type and ip address never change.
//! - The process handle, job id, actor id and the gpu / actor-worker flags
//!   are bound once. Rebinding them to a different value is a bug in the
//!   caller and panics. The check runs after the state lock is released, so
//!   the record stays readable once the panic is caught.
//! - The blocked flag is last-write-wins.
//! - The kill state only moves forward, see [`KillState`].
//!
//! ## Termination
//!
//! [`Worker::kill_async`] sends SIGTERM, arms a one-shot timer for the
//! configured grace period and force kills the process if it is still alive
//! when the timer fires. The timer task owns an `Arc<Worker>`, so the record
//! outlives its own escalation even after the registry drops it. Timers are
//! never cancelled; expiry rechecks liveness instead.

mod lifecycle;

pub use lifecycle::KillState;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use shared_types::rpc::{ActorCallArgWaitCompleteRequest, NotifyGcsRestartRequest};
use shared_types::{
    ActorId, Address, BundleId, JobId, Language, StartupToken, TaskId, TaskSpec, WorkerId,
    WorkerType,
};

use crate::config::WorkerOptions;
use crate::process::ProcessHandle;
use crate::rpc::{ClientConnection, CoreWorkerClient, CoreWorkerClientFactory};

use lifecycle::Lifecycle;

/// Everything known about a worker at the moment its process is observed.
#[derive(Debug, Clone)]
pub struct WorkerInit {
    pub worker_id: WorkerId,
    /// Nil for pooled workers that have not picked up a job yet.
    pub job_id: JobId,
    pub runtime_env_hash: i32,
    pub language: Language,
    pub worker_type: WorkerType,
    pub ip_address: String,
    pub startup_token: StartupToken,
}

struct WorkerState {
    startup_token: StartupToken,
    /// Port the worker listens on. -1 until announced.
    port: i32,
    /// Port the agent told the worker to use. -1 until assigned.
    assigned_port: i32,
    assigned_job_id: JobId,
    assigned_task_id: TaskId,
    task_assign_time: Option<DateTime<Utc>>,
    assigned_task: Option<TaskSpec>,
    actor_id: ActorId,
    bundle_id: BundleId,
    is_gpu: Option<bool>,
    is_actor_worker: Option<bool>,
    owner_address: Address,
    rpc_client: Option<Arc<dyn CoreWorkerClient>>,
    /// A GCS restart notice arrived before `rpc_client` existed.
    notify_gcs_restarted: bool,
}

pub struct Worker {
    worker_id: WorkerId,
    language: Language,
    worker_type: WorkerType,
    ip_address: String,
    runtime_env_hash: i32,
    connection: Arc<dyn ClientConnection>,
    client_factory: Arc<dyn CoreWorkerClientFactory>,
    options: WorkerOptions,
    process: OnceLock<ProcessHandle>,
    lifecycle: Lifecycle,
    blocked: AtomicBool,
    state: Mutex<WorkerState>,
}

fn retryable_call_attempted() {
    panic!("node agent never issues retryable calls to a worker");
}

impl Worker {
    pub fn new(
        init: WorkerInit,
        connection: Arc<dyn ClientConnection>,
        client_factory: Arc<dyn CoreWorkerClientFactory>,
        options: WorkerOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            worker_id: init.worker_id,
            language: init.language,
            worker_type: init.worker_type,
            ip_address: init.ip_address,
            runtime_env_hash: init.runtime_env_hash,
            connection,
            client_factory,
            options,
            process: OnceLock::new(),
            lifecycle: Lifecycle::new(),
            blocked: AtomicBool::new(false),
            state: Mutex::new(WorkerState {
                startup_token: init.startup_token,
                port: -1,
                assigned_port: -1,
                assigned_job_id: init.job_id,
                assigned_task_id: TaskId::nil(),
                task_assign_time: None,
                assigned_task: None,
                actor_id: ActorId::nil(),
                bundle_id: BundleId::nil(),
                is_gpu: None,
                is_actor_worker: None,
                owner_address: Address::default(),
                rpc_client: None,
                notify_gcs_restarted: false,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().expect("worker state lock poisoned")
    }

    // ------------------------------------------------------------------------
    // Identity & classification
    // ------------------------------------------------------------------------

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn worker_type(&self) -> WorkerType {
        self.worker_type
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn runtime_env_hash(&self) -> i32 {
        self.runtime_env_hash
    }

    pub fn connection(&self) -> Arc<dyn ClientConnection> {
        Arc::clone(&self.connection)
    }

    pub fn startup_token(&self) -> StartupToken {
        self.state().startup_token
    }

    pub fn set_startup_token(&self, startup_token: StartupToken) {
        self.state().startup_token = startup_token;
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.process.get().cloned()
    }

    /// Bind the worker's OS process. Panics if one is already bound.
    pub fn set_process(&self, process: ProcessHandle) {
        let pid = process.id();
        if self.process.set(process).is_err() {
            panic!(
                "worker {} already has a process; refusing to rebind to pid {pid}",
                self.worker_id
            );
        }
    }

    /// Listening port, or -1 if the worker has not announced one. Not
    /// asserted: a worker may die before its announcement reaches us.
    pub fn port(&self) -> i32 {
        self.state().port
    }

    pub fn assigned_port(&self) -> i32 {
        self.state().assigned_port
    }

    pub fn set_assigned_port(&self, port: i32) {
        self.state().assigned_port = port;
    }

    pub fn owner_address(&self) -> Address {
        self.state().owner_address.clone()
    }

    pub fn set_owner_address(&self, address: Address) {
        self.state().owner_address = address;
    }

    // ------------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------------

    pub fn assigned_job_id(&self) -> JobId {
        self.state().assigned_job_id
    }

    /// Bind the job on first call; afterwards the id must match.
    pub fn assign_job_id(&self, job_id: JobId) {
        let bound = {
            let mut state = self.state();
            if state.assigned_job_id.is_nil() {
                state.assigned_job_id = job_id;
            }
            state.assigned_job_id
        };
        assert_eq!(
            bound,
            job_id,
            "Job_id mismatch, assigned: {}, actual: {}",
            bound.hex(),
            job_id.hex()
        );
    }

    pub fn assigned_task_id(&self) -> TaskId {
        self.state().assigned_task_id
    }

    /// Overwrite the current task. A non-nil id stamps the assignment time.
    pub fn assign_task_id(&self, task_id: TaskId) {
        let mut state = self.state();
        state.assigned_task_id = task_id;
        if !task_id.is_nil() {
            state.task_assign_time = Some(Utc::now());
        }
    }

    /// When the current task was assigned. Read by stall detection.
    pub fn task_assign_time(&self) -> Option<DateTime<Utc>> {
        self.state().task_assign_time
    }

    pub fn set_assigned_task(&self, task: TaskSpec) {
        let task_id = task.task_id;
        self.state().assigned_task = Some(task);
        self.assign_task_id(task_id);
    }

    pub fn assigned_task(&self) -> Option<TaskSpec> {
        self.state().assigned_task.clone()
    }

    pub fn is_detached_actor(&self) -> bool {
        self.state()
            .assigned_task
            .as_ref()
            .is_some_and(TaskSpec::is_detached_actor)
    }

    pub fn actor_id(&self) -> ActorId {
        self.state().actor_id
    }

    /// Bind the hosted actor. Panics on a nil id or if an actor is already bound.
    pub fn assign_actor_id(&self, actor_id: ActorId) {
        let previous = {
            let mut state = self.state();
            let previous = state.actor_id;
            if previous.is_nil() && !actor_id.is_nil() {
                state.actor_id = actor_id;
            }
            previous
        };
        assert!(
            previous.is_nil(),
            "A worker that is already an actor cannot be assigned an actor ID again."
        );
        assert!(!actor_id.is_nil(), "cannot assign a nil actor ID");
    }

    pub fn bundle_id(&self) -> BundleId {
        self.state().bundle_id
    }

    pub fn set_bundle_id(&self, bundle_id: BundleId) {
        self.state().bundle_id = bundle_id;
    }

    pub fn is_gpu(&self) -> Option<bool> {
        self.state().is_gpu
    }

    pub fn set_is_gpu(&self, is_gpu: bool) {
        let bound = *self.state().is_gpu.get_or_insert(is_gpu);
        assert_eq!(
            bound, is_gpu,
            "is_gpu mismatch, assigned: {bound}, actual: {is_gpu}"
        );
    }

    pub fn is_actor_worker(&self) -> Option<bool> {
        self.state().is_actor_worker
    }

    pub fn set_is_actor_worker(&self, is_actor_worker: bool) {
        let bound = *self.state().is_actor_worker.get_or_insert(is_actor_worker);
        assert_eq!(
            bound, is_actor_worker,
            "is_actor_worker mismatch, assigned: {bound}, actual: {is_actor_worker}"
        );
    }

    pub fn task_or_actor_id_debug_string(&self) -> String {
        let state = self.state();
        if state.actor_id.is_nil() {
            format!("task ID: {}", state.assigned_task_id)
        } else {
            format!("actor ID: {}", state.actor_id)
        }
    }

    // ------------------------------------------------------------------------
    // Blocking
    // ------------------------------------------------------------------------

    pub fn mark_blocked(&self) {
        self.blocked.store(true, Ordering::Relaxed);
    }

    pub fn mark_unblocked(&self) {
        self.blocked.store(false, Ordering::Relaxed);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------------

    pub fn kill_state(&self) -> KillState {
        self.lifecycle.get()
    }

    /// True once termination has begun, whether or not the process exited.
    pub fn is_dead(&self) -> bool {
        self.lifecycle.get() != KillState::Alive
    }

    /// Record that the process died without us killing it. A later
    /// `kill_async` becomes a no-op.
    pub fn mark_dead(&self) {
        if self.lifecycle.begin(KillState::Dead) {
            debug!(worker_id = %self.worker_id, "worker marked dead");
        }
    }

    /// Start terminating the worker. Only the first call (across this and
    /// [`Worker::mark_dead`]) does anything; it returns true.
    ///
    /// `force` kills immediately. Otherwise the process gets SIGTERM and a
    /// timer on `io` escalates to a kill after the grace period.
    pub fn kill_async(self: &Arc<Self>, io: &Handle, force: bool) -> bool {
        let first = if force {
            KillState::Dead
        } else {
            KillState::Terminating
        };
        if !self.lifecycle.begin(first) {
            return false;
        }

        let Some(process) = self.process() else {
            warn!(worker_id = %self.worker_id, "kill requested for worker without a process");
            self.lifecycle.advance(KillState::Dead);
            return true;
        };

        if force {
            info!(worker_id = %self.worker_id, pid = process.id(), "force killing worker");
            process.kill();
            return true;
        }

        if !process.terminate() {
            debug!(
                worker_id = %self.worker_id,
                pid = process.id(),
                "graceful stop unavailable; waiting out the grace period"
            );
        }

        let grace = self.options.kill_worker_timeout;
        let started = Instant::now();
        let worker = Arc::clone(self);
        self.lifecycle.advance(KillState::GracePeriod);
        io.spawn(async move {
            tokio::time::sleep(grace).await;
            worker.escalate(&process, started);
        });
        true
    }

    fn escalate(&self, process: &ProcessHandle, started: Instant) {
        if process.is_alive() {
            warn!(
                worker_id = %self.worker_id,
                pid = process.id(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "worker did not exit after {}ms, force killing with SIGKILL",
                self.options.kill_worker_timeout.as_millis()
            );
            process.kill();
        }
        self.lifecycle.advance(KillState::Dead);
    }

    // ------------------------------------------------------------------------
    // Connection / notification bridge
    // ------------------------------------------------------------------------

    /// Build an RPC client for the worker's announced `port` and bind it.
    pub fn connect(&self, port: i32) {
        assert!(
            port > 0,
            "worker {} announced invalid port {port}",
            self.worker_id
        );
        let address = Address {
            ip_address: self.ip_address.clone(),
            port,
            worker_id: self.worker_id,
        };
        let client = self
            .client_factory
            .connect(&address, Arc::new(retryable_call_attempted));
        self.state().port = port;
        self.connect_client(client);
    }

    /// Bind an already built client. Flushes a GCS restart notice that
    /// arrived before the worker was reachable.
    pub fn connect_client(&self, client: Arc<dyn CoreWorkerClient>) {
        let pending = {
            let mut state = self.state();
            state.rpc_client = Some(Arc::clone(&client));
            std::mem::take(&mut state.notify_gcs_restarted)
        };
        debug!(worker_id = %self.worker_id, pending_notice = pending, "worker rpc client bound");
        if pending {
            self.send_gcs_restart(client.as_ref());
        }
    }

    pub fn rpc_client(&self) -> Option<Arc<dyn CoreWorkerClient>> {
        self.state().rpc_client.clone()
    }

    /// Tell the worker the GCS restarted, now or as soon as it connects.
    /// Notices before connection collapse into one.
    pub fn async_notify_gcs_restart(&self) {
        let client = {
            let mut state = self.state();
            let client = state.rpc_client.clone();
            if client.is_none() {
                state.notify_gcs_restarted = true;
            }
            client
        };
        if let Some(client) = client {
            self.send_gcs_restart(client.as_ref());
        }
    }

    fn send_gcs_restart(&self, client: &dyn CoreWorkerClient) {
        let worker_id = self.worker_id;
        client.notify_gcs_restart(
            NotifyGcsRestartRequest::default(),
            Box::new(move |status, _reply| {
                if !status.is_ok() {
                    error!(%worker_id, "Failed to notify worker about GCS restarting: {status}");
                }
            }),
        );
    }

    /// Tell an actor worker the arguments of call `tag` are ready.
    /// Panics if the worker has not connected.
    pub fn actor_call_arg_wait_complete(&self, tag: i64) {
        let (port, client) = {
            let state = self.state();
            (state.port, state.rpc_client.clone())
        };
        assert!(
            port > 0,
            "worker {} has no port; cannot complete wait for tag {tag}",
            self.worker_id
        );
        let Some(client) = client else {
            panic!("worker {} has no rpc client", self.worker_id);
        };
        let request = ActorCallArgWaitCompleteRequest {
            tag,
            intended_worker_id: self.worker_id,
        };
        client.actor_call_arg_wait_complete(
            request,
            Box::new(|status, _reply| {
                if !status.is_ok() {
                    error!("Failed to send wait complete: {status}");
                }
            }),
        );
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .field("worker_type", &self.worker_type)
            .field("pid", &self.process.get().map(|p| p.id()))
            .field("kill_state", &self.lifecycle.get())
            .finish_non_exhaustive()
    }
}
