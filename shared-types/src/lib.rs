//! Shared types for the node agent
//!
//! These types are used by:
//! - the worker supervision layer (worker entity, kill protocol, registry)
//! - the RPC transport that commands worker processes
//!
//! Identifiers and RPC messages are serializable with serde so they can cross
//! the process boundary as JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod status;

pub use status::{Status, StatusCode, UnknownStatusCode};

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The nil id, used for "not assigned".
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            pub fn hex(&self) -> String {
                self.0.simple().to_string()
            }

            pub fn binary(&self) -> [u8; 16] {
                *self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifies a job (driver program) on the cluster.
    JobId
);
define_id!(
    /// Identifies a single task invocation.
    TaskId
);
define_id!(
    /// Identifies an actor; bound to at most one worker for its lifetime.
    ActorId
);
define_id!(
    /// Identifies a worker process. Stable for the life of the worker.
    WorkerId
);
define_id!(
    /// Identifies a placement group.
    PlacementGroupId
);

/// Correlates a spawn request with the process that eventually connects.
pub type StartupToken = i64;

/// A placement-group reservation slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BundleId {
    pub placement_group_id: PlacementGroupId,
    pub bundle_index: i64,
}

impl BundleId {
    pub fn new(placement_group_id: PlacementGroupId, bundle_index: i64) -> Self {
        Self {
            placement_group_id,
            bundle_index,
        }
    }

    pub const fn nil() -> Self {
        Self {
            placement_group_id: PlacementGroupId::nil(),
            bundle_index: -1,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.placement_group_id.is_nil()
    }
}

impl Default for BundleId {
    fn default() -> Self {
        Self::nil()
    }
}

// ============================================================================
// Worker classification
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Cpp,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Java => write!(f, "java"),
            Language::Cpp => write!(f, "cpp"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    /// A pooled process that executes tasks or hosts an actor.
    Worker,
    /// The process running the job's driver program.
    Driver,
    /// Dedicated to spilling objects to external storage.
    SpillWorker,
    /// Dedicated to restoring spilled objects.
    RestoreWorker,
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerType::Worker => write!(f, "worker"),
            WorkerType::Driver => write!(f, "driver"),
            WorkerType::SpillWorker => write!(f, "spill_worker"),
            WorkerType::RestoreWorker => write!(f, "restore_worker"),
        }
    }
}

/// Network address of a worker or object owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Address {
    pub ip_address: String,
    pub port: i32,
    #[serde(default)]
    pub worker_id: WorkerId,
}

impl Address {
    pub fn new(ip_address: impl Into<String>, port: i32) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
            worker_id: WorkerId::nil(),
        }
    }

    /// `ip:port`, suitable for dialing.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

/// The subset of a task specification the supervision layer reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub name: String,
    /// Set for actor creation tasks whose actor outlives its job.
    #[serde(default)]
    pub detached_actor: bool,
}

impl TaskSpec {
    pub fn is_detached_actor(&self) -> bool {
        self.detached_actor
    }
}

// ============================================================================
// Worker RPC messages
// ============================================================================

pub mod rpc {
    use serde::{Deserialize, Serialize};

    use crate::WorkerId;

    /// Tells a worker the cluster's coordination service came back up.
    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
    pub struct NotifyGcsRestartRequest {}

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
    pub struct NotifyGcsRestartReply {}

    /// Tells an actor worker that the arguments of a pending call are local.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct ActorCallArgWaitCompleteRequest {
        pub tag: i64,
        pub intended_worker_id: WorkerId,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
    pub struct ActorCallArgWaitCompleteReply {}
}
