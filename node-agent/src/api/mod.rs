use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info};

use shared_types::{JobId, Language, Status, WorkerId, WorkerType};

use crate::process::OsProcess;
use crate::rpc::DetachedConnection;
use crate::worker::{Worker, WorkerInit};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/workers", get(list_workers).post(adopt_worker))
        .route("/admin/workers/{worker_id}/kill", post(kill_worker))
        .route("/admin/workers/{worker_id}/block", post(block_worker))
        .route("/admin/workers/{worker_id}/unblock", post(unblock_worker))
        .route("/admin/gcs-restarted", post(gcs_restarted))
        .with_state(state)
}

fn status_response(status: Status) -> Response {
    let code = if status.is_not_found() {
        StatusCode::NOT_FOUND
    } else if status.is_already_exists() {
        StatusCode::CONFLICT
    } else if status.is_invalid_argument() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(status)).into_response()
}

fn parse_worker_id(raw: &str) -> Result<WorkerId, Status> {
    raw.parse()
        .map_err(|e| Status::invalid_argument(format!("bad worker id '{raw}': {e}")))
}

fn lookup(state: &AppState, raw: &str) -> Result<Arc<Worker>, Status> {
    let worker_id = parse_worker_id(raw)?;
    state
        .registry
        .get(&worker_id)
        .ok_or_else(|| Status::not_found(format!("worker {worker_id} is not registered")))
}

/// GET /admin/workers - list all workers
pub async fn list_workers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshot())
}

#[derive(serde::Deserialize)]
pub struct AdoptWorkerRequest {
    pub pid: u32,
    pub language: Language,
    pub worker_type: WorkerType,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub port: Option<i32>,
}

/// POST /admin/workers - track an already running worker process
pub async fn adopt_worker(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdoptWorkerRequest>,
) -> Response {
    if let Some(port) = req.port.filter(|p| *p <= 0) {
        return status_response(Status::invalid_argument(format!("invalid port {port}")));
    }
    // Signalling pid 0 reaches our own process group.
    if req.pid == 0 || req.pid == std::process::id() {
        return status_response(Status::invalid_argument(format!(
            "pid {} cannot be adopted as a worker",
            req.pid
        )));
    }

    let worker = Worker::new(
        WorkerInit {
            worker_id: WorkerId::new(),
            job_id: req.job_id.unwrap_or_default(),
            runtime_env_hash: 0,
            language: req.language,
            worker_type: req.worker_type,
            ip_address: state.config.node_ip_address.clone(),
            startup_token: -1,
        },
        Arc::new(DetachedConnection),
        Arc::clone(&state.client_factory),
        state.config.worker_options(),
    );
    worker.set_process(OsProcess::handle(req.pid));
    if let Some(port) = req.port {
        worker.connect(port);
    }

    let worker_id = worker.worker_id();
    if let Err(status) = state.registry.register(worker) {
        error!("adopt worker: {status}");
        return status_response(status);
    }
    info!(%worker_id, pid = req.pid, "adopted worker process");
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "worker_id": worker_id })),
    )
        .into_response()
}

#[derive(serde::Deserialize)]
pub struct KillParams {
    #[serde(default)]
    pub force: bool,
}

/// POST /admin/workers/:worker_id/kill?force=bool
pub async fn kill_worker(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    Query(params): Query<KillParams>,
) -> Response {
    let result =
        parse_worker_id(&worker_id).and_then(|id| state.registry.kill(&id, params.force));
    match result {
        Ok(started) => Json(serde_json::json!({ "started": started })).into_response(),
        Err(status) => {
            error!("kill worker: {status}");
            status_response(status)
        }
    }
}

/// POST /admin/workers/:worker_id/block
pub async fn block_worker(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
) -> Response {
    match lookup(&state, &worker_id) {
        Ok(worker) => {
            worker.mark_blocked();
            StatusCode::OK.into_response()
        }
        Err(status) => status_response(status),
    }
}

/// POST /admin/workers/:worker_id/unblock
pub async fn unblock_worker(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
) -> Response {
    match lookup(&state, &worker_id) {
        Ok(worker) => {
            worker.mark_unblocked();
            StatusCode::OK.into_response()
        }
        Err(status) => status_response(status),
    }
}

/// POST /admin/gcs-restarted - forward the notice to every worker
pub async fn gcs_restarted(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.registry.notify_gcs_restart_all();
    StatusCode::ACCEPTED
}
