//! JSON-lines transport for worker RPCs
//!
//! One TCP connection per worker, dialed lazily on the first call. Each call
//! writes `{"method": ..., "payload": ...}` as a single line and reads one
//! line back: `{"status": <Status>, "reply": ...}`. Calls on the same client
//! are serialized so replies always match their request.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use shared_types::rpc::{
    ActorCallArgWaitCompleteReply, ActorCallArgWaitCompleteRequest, NotifyGcsRestartReply,
    NotifyGcsRestartRequest,
};
use shared_types::{Address, Status};

use crate::rpc::{ClientCallback, CoreWorkerClient, CoreWorkerClientFactory, UnavailableCallback};

/// gRPC-compatible sub-codes carried by `RpcError` statuses.
pub const RPC_CODE_INTERNAL: i32 = 13;
pub const RPC_CODE_UNAVAILABLE: i32 = 14;

/// Longest reply line accepted from a worker.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

pub const METHOD_NOTIFY_GCS_RESTART: &str = "NotifyGcsRestart";
pub const METHOD_ACTOR_CALL_ARG_WAIT_COMPLETE: &str = "ActorCallArgWaitComplete";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("frame error: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("connection closed before reply")]
    Closed,
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("did not complete within {}ms", .0.as_millis())]
    Deadline(Duration),
}

impl From<TransportError> for Status {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::Deadline(_) => return Status::timed_out(err.to_string()),
            TransportError::Json(_) => RPC_CODE_INTERNAL,
            _ => RPC_CODE_UNAVAILABLE,
        };
        Status::rpc_error(err.to_string(), code)
    }
}

#[derive(Serialize)]
struct RequestFrame<'a, T> {
    method: &'a str,
    payload: &'a T,
}

#[derive(Deserialize)]
struct ReplyFrame {
    status: Status,
    #[serde(default)]
    reply: serde_json::Value,
}

type Connection = Framed<TcpStream, LinesCodec>;

pub struct JsonCoreWorkerClient {
    address: Address,
    runtime: Handle,
    call_timeout: Duration,
    on_unavailable: UnavailableCallback,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl JsonCoreWorkerClient {
    pub fn new(
        address: Address,
        runtime: Handle,
        call_timeout: Duration,
        on_unavailable: UnavailableCallback,
    ) -> Self {
        Self {
            address,
            runtime,
            call_timeout,
            on_unavailable,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Issue `method` on the worker. The callback always runs exactly once,
    /// on the runtime this client was built with.
    ///
    /// A `retryable` call that cannot reach the worker fires the client's
    /// unavailable callback before completing with an error.
    pub fn invoke<Req, Rep>(
        &self,
        method: &'static str,
        request: Req,
        retryable: bool,
        callback: ClientCallback<Rep>,
    ) where
        Req: Serialize,
        Rep: DeserializeOwned + Default + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let endpoint = self.address.endpoint();
        let call_timeout = self.call_timeout;
        let on_unavailable = retryable.then(|| Arc::clone(&self.on_unavailable));
        let line = serde_json::to_string(&RequestFrame {
            method,
            payload: &request,
        });

        self.runtime.spawn(async move {
            let outcome = match line {
                Ok(line) => round_trip(&conn, &endpoint, line, call_timeout).await,
                Err(e) => Err(TransportError::from(e)),
            };
            let (status, reply) = match outcome {
                Ok(line) => decode_reply::<Rep>(&line),
                Err(err) => {
                    if let (TransportError::Dial { .. }, Some(cb)) = (&err, &on_unavailable) {
                        (cb.as_ref())();
                    }
                    let mut status = Status::from(err);
                    if status.is_timed_out() {
                        status <<= format!(" ({method} to {endpoint})");
                    }
                    (status, Rep::default())
                }
            };
            debug!(method, %endpoint, %status, "worker rpc completed");
            callback(status, reply);
        });
    }
}

/// One request/reply exchange under the connection lock. Any failure,
/// including the deadline, drops the connection before the lock is released
/// so a late reply can never be read by the next call.
async fn round_trip(
    conn: &Mutex<Option<Connection>>,
    endpoint: &str,
    line: String,
    call_timeout: Duration,
) -> Result<String, TransportError> {
    let deadline = Instant::now() + call_timeout;
    let mut guard = timeout_at(deadline, conn.lock())
        .await
        .map_err(|_| TransportError::Deadline(call_timeout))?;

    let outcome = match timeout_at(deadline, exchange(&mut guard, endpoint, line)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TransportError::Deadline(call_timeout)),
    };
    if outcome.is_err() {
        *guard = None;
    }
    outcome
}

async fn exchange(
    slot: &mut Option<Connection>,
    endpoint: &str,
    line: String,
) -> Result<String, TransportError> {
    if slot.is_none() {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|source| TransportError::Dial {
                endpoint: endpoint.to_string(),
                source,
            })?;
        *slot = Some(Framed::new(
            stream,
            LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
        ));
    }
    let Some(framed) = slot.as_mut() else {
        return Err(TransportError::Closed);
    };

    framed.send(line).await?;
    match framed.next().await {
        Some(Ok(reply)) => Ok(reply),
        Some(Err(e)) => Err(TransportError::from(e)),
        None => Err(TransportError::Closed),
    }
}

fn decode_reply<Rep: DeserializeOwned + Default>(line: &str) -> (Status, Rep) {
    let frame: ReplyFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => return (TransportError::from(e).into(), Rep::default()),
    };
    if !frame.status.is_ok() {
        return (frame.status, Rep::default());
    }
    match serde_json::from_value(frame.reply) {
        Ok(reply) => (Status::ok(), reply),
        Err(e) => (TransportError::from(e).into(), Rep::default()),
    }
}

impl CoreWorkerClient for JsonCoreWorkerClient {
    fn notify_gcs_restart(
        &self,
        request: NotifyGcsRestartRequest,
        callback: ClientCallback<NotifyGcsRestartReply>,
    ) {
        self.invoke(METHOD_NOTIFY_GCS_RESTART, request, false, callback);
    }

    fn actor_call_arg_wait_complete(
        &self,
        request: ActorCallArgWaitCompleteRequest,
        callback: ClientCallback<ActorCallArgWaitCompleteReply>,
    ) {
        self.invoke(METHOD_ACTOR_CALL_ARG_WAIT_COMPLETE, request, false, callback);
    }
}

/// Hands out [`JsonCoreWorkerClient`]s that run on `runtime`.
#[derive(Clone)]
pub struct JsonClientFactory {
    runtime: Handle,
    call_timeout: Duration,
}

impl JsonClientFactory {
    pub fn new(runtime: Handle, call_timeout: Duration) -> Self {
        Self {
            runtime,
            call_timeout,
        }
    }
}

impl CoreWorkerClientFactory for JsonClientFactory {
    fn connect(
        &self,
        address: &Address,
        on_unavailable: UnavailableCallback,
    ) -> Arc<dyn CoreWorkerClient> {
        Arc::new(JsonCoreWorkerClient::new(
            address.clone(),
            self.runtime.clone(),
            self.call_timeout,
            on_unavailable,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ok_reply() {
        let (status, reply): (Status, NotifyGcsRestartReply) =
            decode_reply(r#"{"status":{"code":"OK"},"reply":{}}"#);
        assert!(status.is_ok());
        assert_eq!(reply, NotifyGcsRestartReply::default());
    }

    #[test]
    fn test_decode_error_status_passes_through() {
        let (status, _): (Status, NotifyGcsRestartReply) =
            decode_reply(r#"{"status":{"code":"NotFound","message":"no actor"}}"#);
        assert!(status.is_not_found());
        assert_eq!(status.message(), "no actor");
    }

    #[test]
    fn test_decode_garbage_is_internal_rpc_error() {
        let (status, _): (Status, NotifyGcsRestartReply) = decode_reply("not json");
        assert!(status.is_rpc_error());
        assert_eq!(status.rpc_code(), RPC_CODE_INTERNAL);
    }

    #[test]
    fn test_deadline_is_timed_out_not_rpc_error() {
        let status = Status::from(TransportError::Deadline(Duration::from_millis(200)));
        assert!(status.is_timed_out());
        assert_eq!(status.rpc_code(), -1);
        assert!(status.message().contains("200ms"), "{status}");
    }

    #[test]
    fn test_request_frame_shape() {
        let req = NotifyGcsRestartRequest {};
        let line = serde_json::to_string(&RequestFrame {
            method: METHOD_NOTIFY_GCS_RESTART,
            payload: &req,
        })
        .unwrap();
        assert_eq!(line, r#"{"method":"NotifyGcsRestart","payload":{}}"#);
    }
}
