use std::sync::Arc;

use crate::config::Config;
use crate::registry::WorkerRegistry;
use crate::rpc::CoreWorkerClientFactory;

pub struct AppState {
    pub config: Config,
    pub registry: Arc<WorkerRegistry>,
    pub client_factory: Arc<dyn CoreWorkerClientFactory>,
}
