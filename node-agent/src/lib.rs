//! Node agent - worker process supervision
//!
//! Tracks the worker processes running on this node: their identity and
//! assignment, the RPC channel used to command them, and the
//! SIGTERM-then-SIGKILL termination protocol.

pub mod api;
pub mod config;
pub mod process;
pub mod registry;
pub mod rpc;
pub mod state;
pub mod transport;
pub mod worker;

pub use state::AppState;
