//! RPC boundary between the node agent and its workers
//!
//! Calls are fire-and-forget from the caller's side: each takes a request and
//! a callback that receives `(Status, reply)` on the I/O context once the
//! call completes or fails.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use shared_types::rpc::{
    ActorCallArgWaitCompleteReply, ActorCallArgWaitCompleteRequest, NotifyGcsRestartReply,
    NotifyGcsRestartRequest,
};
use shared_types::{Address, Status};

pub type ClientCallback<R> = Box<dyn FnOnce(Status, R) + Send + 'static>;

/// Invoked when a retryable call finds the worker unreachable.
pub type UnavailableCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Commands the node agent can send to a worker.
pub trait CoreWorkerClient: Send + Sync {
    fn notify_gcs_restart(
        &self,
        request: NotifyGcsRestartRequest,
        callback: ClientCallback<NotifyGcsRestartReply>,
    );

    fn actor_call_arg_wait_complete(
        &self,
        request: ActorCallArgWaitCompleteRequest,
        callback: ClientCallback<ActorCallArgWaitCompleteReply>,
    );
}

/// Builds clients bound to a worker's announced address.
pub trait CoreWorkerClientFactory: Send + Sync {
    fn connect(
        &self,
        address: &Address,
        on_unavailable: UnavailableCallback,
    ) -> Arc<dyn CoreWorkerClient>;
}

/// The raw socket a worker registered over. Its lifetime is managed by
/// whoever accepted it; the worker only keeps a reference.
pub trait ClientConnection: Send + Sync + fmt::Debug {
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Stand-in for workers adopted without a registration socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedConnection;

impl ClientConnection for DetachedConnection {
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}
