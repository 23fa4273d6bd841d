//! Test doubles for the process and RPC boundaries.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use node_agent::config::WorkerOptions;
use node_agent::process::Process;
use node_agent::rpc::{
    ClientCallback, CoreWorkerClient, CoreWorkerClientFactory, DetachedConnection,
    UnavailableCallback,
};
use node_agent::worker::{Worker, WorkerInit};
use shared_types::rpc::{
    ActorCallArgWaitCompleteReply, ActorCallArgWaitCompleteRequest, NotifyGcsRestartReply,
    NotifyGcsRestartRequest,
};
use shared_types::{Address, JobId, Language, Status, WorkerId, WorkerType};

/// A process that only exists in memory.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    alive: AtomicBool,
    exit_on_terminate: bool,
    pub terminates: AtomicUsize,
    pub kills: AtomicUsize,
}

impl FakeProcess {
    /// Ignores SIGTERM; only a kill stops it.
    pub fn stubborn(pid: u32) -> Arc<Self> {
        Arc::new(Self::build(pid, false))
    }

    /// Exits as soon as it is asked to terminate.
    pub fn cooperative(pid: u32) -> Arc<Self> {
        Arc::new(Self::build(pid, true))
    }

    fn build(pid: u32, exit_on_terminate: bool) -> Self {
        Self {
            pid,
            alive: AtomicBool::new(true),
            exit_on_terminate,
            terminates: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        }
    }

    /// The process exits on its own.
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn terminate_count(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl Process for FakeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }

    fn terminate(&self) -> bool {
        self.terminates.fetch_add(1, Ordering::SeqCst);
        if self.exit_on_terminate {
            self.alive.store(false, Ordering::SeqCst);
        }
        true
    }
}

/// Completes every call immediately with `reply_status`.
pub struct RecordingClient {
    pub notify_calls: AtomicUsize,
    pub wait_complete: Mutex<Vec<ActorCallArgWaitCompleteRequest>>,
    reply_status: Mutex<Status>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notify_calls: AtomicUsize::new(0),
            wait_complete: Mutex::new(Vec::new()),
            reply_status: Mutex::new(Status::ok()),
        })
    }

    pub fn failing(status: Status) -> Arc<Self> {
        let client = Self::new();
        *client.reply_status.lock().unwrap() = status;
        client
    }

    pub fn notify_count(&self) -> usize {
        self.notify_calls.load(Ordering::SeqCst)
    }
}

impl CoreWorkerClient for RecordingClient {
    fn notify_gcs_restart(
        &self,
        _request: NotifyGcsRestartRequest,
        callback: ClientCallback<NotifyGcsRestartReply>,
    ) {
        self.notify_calls.fetch_add(1, Ordering::SeqCst);
        let status = self.reply_status.lock().unwrap().clone();
        callback(status, NotifyGcsRestartReply::default());
    }

    fn actor_call_arg_wait_complete(
        &self,
        request: ActorCallArgWaitCompleteRequest,
        callback: ClientCallback<ActorCallArgWaitCompleteReply>,
    ) {
        self.wait_complete.lock().unwrap().push(request);
        let status = self.reply_status.lock().unwrap().clone();
        callback(status, ActorCallArgWaitCompleteReply::default());
    }
}

/// Hands out `RecordingClient`s and remembers the addresses it was given.
#[derive(Default)]
pub struct RecordingFactory {
    pub connects: Mutex<Vec<(Address, Arc<RecordingClient>)>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_client(&self) -> Arc<RecordingClient> {
        let connects = self.connects.lock().unwrap();
        Arc::clone(&connects.last().expect("no client was built").1)
    }

    pub fn last_address(&self) -> Address {
        let connects = self.connects.lock().unwrap();
        connects.last().expect("no client was built").0.clone()
    }
}

impl CoreWorkerClientFactory for RecordingFactory {
    fn connect(
        &self,
        address: &Address,
        _on_unavailable: UnavailableCallback,
    ) -> Arc<dyn CoreWorkerClient> {
        let client = RecordingClient::new();
        self.connects
            .lock()
            .unwrap()
            .push((address.clone(), Arc::clone(&client)));
        client
    }
}

pub fn init(job_id: JobId) -> WorkerInit {
    WorkerInit {
        worker_id: WorkerId::new(),
        job_id,
        runtime_env_hash: 7,
        language: Language::Python,
        worker_type: WorkerType::Worker,
        ip_address: "10.0.0.5".to_string(),
        startup_token: 1,
    }
}

pub fn worker_with(options: WorkerOptions) -> (Arc<Worker>, Arc<RecordingFactory>) {
    let factory = RecordingFactory::new();
    let worker = Worker::new(
        init(JobId::nil()),
        Arc::new(DetachedConnection),
        factory.clone(),
        options,
    );
    (worker, factory)
}

pub fn worker() -> (Arc<Worker>, Arc<RecordingFactory>) {
    worker_with(WorkerOptions::default())
}
