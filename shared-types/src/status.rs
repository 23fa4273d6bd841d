//! Status - the success-or-typed-error value returned by fallible operations
//!
//! A `Status` is either OK or carries a [`StatusCode`], a message, and an
//! optional RPC sub-code. The OK value holds no allocation; errors box their
//! payload so the type stays pointer-sized.
//!
//! Any number of threads may read a `Status` concurrently. Appending to the
//! message needs `&mut`, so a value must be finished before it is shared.

use std::fmt::{self, Write as _};
use std::io;
use std::ops::ShlAssign;
use std::panic::Location;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Returned when a code name does not match any [`StatusCode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status code name: {0}")]
pub struct UnknownStatusCode(pub String);

// The enum, its canonical names and the ALL table come from one list so a
// new code cannot be added without its name.
macro_rules! status_codes {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// Outcome kinds carried by a [`Status`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        pub enum StatusCode {
            $($variant = $value,)+
        }

        impl StatusCode {
            /// Every code, in declaration order.
            pub const ALL: &'static [StatusCode] = &[$(StatusCode::$variant,)+];

            /// Canonical name used in logs and on the wire.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(StatusCode::$variant => $name,)+
                }
            }
        }

        impl FromStr for StatusCode {
            type Err = UnknownStatusCode;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(StatusCode::$variant),)+
                    other => Err(UnknownStatusCode(other.to_string())),
                }
            }
        }
    };
}

status_codes! {
    Ok = 0 => "OK",
    OutOfMemory = 1 => "OutOfMemory",
    KeyError = 2 => "KeyError",
    TypeError = 3 => "TypeError",
    Invalid = 4 => "Invalid",
    IoError = 5 => "IOError",
    UnknownError = 9 => "UnknownError",
    NotImplemented = 10 => "NotImplemented",
    RedisError = 11 => "RedisError",
    TimedOut = 12 => "TimedOut",
    Interrupted = 13 => "Interrupted",
    IntentionalSystemExit = 14 => "IntentionalSystemExit",
    UnexpectedSystemExit = 15 => "UnexpectedSystemExit",
    CreationTaskError = 16 => "CreationTaskError",
    NotFound = 17 => "NotFound",
    Disconnected = 18 => "Disconnected",
    SchedulingCancelled = 19 => "SchedulingCancelled",
    AlreadyExists = 20 => "AlreadyExists",
    ObjectExists = 21 => "ObjectExists",
    ObjectNotFound = 22 => "ObjectNotFound",
    ObjectAlreadySealed = 23 => "ObjectAlreadySealed",
    ObjectStoreFull = 24 => "ObjectStoreFull",
    TransientObjectStoreFull = 25 => "TransientObjectStoreFull",
    // Object store is both out of memory and out of disk.
    OutOfDisk = 28 => "OutOfDisk",
    ObjectUnknownOwner = 29 => "ObjectUnknownOwner",
    RpcError = 30 => "RpcError",
    OutOfResource = 31 => "OutOfResource",
    ObjectRefEndOfStream = 32 => "ObjectRefEndOfStream",
    AuthError = 33 => "AuthError",
    InvalidArgument = 34 => "InvalidArgument",
    // A channel (mutable shared object) is closed and cannot be read or written.
    ChannelError = 35 => "ChannelError",
    ChannelTimeoutError = 36 => "ChannelTimeoutError",
}

impl StatusCode {
    pub fn value(self) -> i8 {
        self as i8
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let name = String::deserialize(d)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone)]
struct State {
    code: StatusCode,
    msg: String,
    /// Only meaningful for `RpcError`; -1 otherwise.
    rpc_code: i32,
    location: &'static Location<'static>,
}

/// Result of an operation: OK, or an error code with a message.
#[must_use]
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(into = "WireStatus", from = "WireStatus")]
pub struct Status {
    state: Option<Box<State>>,
}

macro_rules! status_factories {
    ($($ctor:ident, $pred:ident => $code:ident;)+) => {
        impl Status {
            $(
                #[track_caller]
                pub fn $ctor(msg: impl Into<String>) -> Self {
                    Self::from_code(StatusCode::$code, msg)
                }

                pub fn $pred(&self) -> bool {
                    self.code() == StatusCode::$code
                }
            )+
        }
    };
}

status_factories! {
    out_of_memory, is_out_of_memory => OutOfMemory;
    key_error, is_key_error => KeyError;
    type_error, is_type_error => TypeError;
    invalid, is_invalid => Invalid;
    io_error, is_io_error => IoError;
    unknown_error, is_unknown_error => UnknownError;
    not_implemented, is_not_implemented => NotImplemented;
    redis_error, is_redis_error => RedisError;
    timed_out, is_timed_out => TimedOut;
    interrupted, is_interrupted => Interrupted;
    intentional_system_exit, is_intentional_system_exit => IntentionalSystemExit;
    unexpected_system_exit, is_unexpected_system_exit => UnexpectedSystemExit;
    creation_task_error, is_creation_task_error => CreationTaskError;
    not_found, is_not_found => NotFound;
    disconnected, is_disconnected => Disconnected;
    scheduling_cancelled, is_scheduling_cancelled => SchedulingCancelled;
    already_exists, is_already_exists => AlreadyExists;
    object_exists, is_object_exists => ObjectExists;
    object_not_found, is_object_not_found => ObjectNotFound;
    object_already_sealed, is_object_already_sealed => ObjectAlreadySealed;
    object_store_full, is_object_store_full => ObjectStoreFull;
    transient_object_store_full, is_transient_object_store_full => TransientObjectStoreFull;
    out_of_disk, is_out_of_disk => OutOfDisk;
    object_unknown_owner, is_object_unknown_owner => ObjectUnknownOwner;
    out_of_resource, is_out_of_resource => OutOfResource;
    object_ref_end_of_stream, is_object_ref_end_of_stream => ObjectRefEndOfStream;
    auth_error, is_auth_error => AuthError;
    invalid_argument, is_invalid_argument => InvalidArgument;
    channel_error, is_channel_error => ChannelError;
    channel_timeout_error, is_channel_timeout_error => ChannelTimeoutError;
}

impl Status {
    /// The success value. Holds no allocation.
    pub const fn ok() -> Self {
        Self { state: None }
    }

    /// General constructor. `StatusCode::Ok` yields the success value and
    /// drops the message.
    #[track_caller]
    pub fn from_code(code: StatusCode, msg: impl Into<String>) -> Self {
        Self::build(code, msg.into(), -1, Location::caller())
    }

    /// An RPC failure carrying the transport's numeric status code.
    #[track_caller]
    pub fn rpc_error(msg: impl Into<String>, rpc_code: i32) -> Self {
        Self::build(StatusCode::RpcError, msg.into(), rpc_code, Location::caller())
    }

    fn build(
        code: StatusCode,
        msg: String,
        rpc_code: i32,
        location: &'static Location<'static>,
    ) -> Self {
        if code == StatusCode::Ok {
            return Self::ok();
        }
        Self {
            state: Some(Box::new(State {
                code,
                msg,
                rpc_code,
                location,
            })),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.state.is_none()
    }

    pub fn is_rpc_error(&self) -> bool {
        self.code() == StatusCode::RpcError
    }

    pub fn code(&self) -> StatusCode {
        self.state.as_ref().map_or(StatusCode::Ok, |s| s.code)
    }

    /// The RPC sub-code, or -1 when there is none.
    pub fn rpc_code(&self) -> i32 {
        self.state.as_ref().map_or(-1, |s| s.rpc_code)
    }

    pub fn message(&self) -> &str {
        self.state.as_ref().map_or("", |s| s.msg.as_str())
    }

    /// Where the error was constructed. `None` for OK.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.state.as_ref().map(|s| s.location)
    }

    /// Canonical name of the code, without the message.
    pub fn code_as_string(&self) -> &'static str {
        self.code().as_str()
    }

    /// Append text to the message of an error value. The code never changes.
    ///
    /// Panics when called on an OK value.
    #[track_caller]
    pub fn append(&mut self, msg: impl fmt::Display) -> &mut Self {
        match self.state.as_mut() {
            Some(state) => {
                let _ = write!(state.msg, "{msg}");
            }
            None => panic!("cannot append \"{msg}\" to an OK status"),
        }
        self
    }

    pub fn into_result(self) -> Result<(), Status> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Panic unless OK, with the status and `context` in the message.
    #[track_caller]
    pub fn expect_ok(&self, context: impl fmt::Display) {
        if !self.is_ok() {
            panic!("Status not OK: {self} {context}");
        }
    }
}

impl<T: fmt::Display> ShlAssign<T> for Status {
    #[track_caller]
    fn shl_assign(&mut self, msg: T) {
        self.append(msg);
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            None => f.write_str("OK"),
            Some(state) => write!(f, "{}: {}", state.code, state.msg),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            None => f.write_str("Status(OK)"),
            Some(state) => f
                .debug_struct("Status")
                .field("code", &state.code)
                .field("message", &state.msg)
                .field("rpc_code", &state.rpc_code)
                .field("location", &format_args!("{}", state.location))
                .finish(),
        }
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
            && self.message() == other.message()
            && self.rpc_code() == other.rpc_code()
    }
}

impl Eq for Status {}

impl std::error::Error for Status {}

impl From<io::Error> for Status {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::TimedOut => StatusCode::TimedOut,
            io::ErrorKind::NotFound => StatusCode::NotFound,
            io::ErrorKind::AlreadyExists => StatusCode::AlreadyExists,
            io::ErrorKind::InvalidInput => StatusCode::InvalidArgument,
            io::ErrorKind::Interrupted => StatusCode::Interrupted,
            _ => StatusCode::IoError,
        };
        Self::from_code(code, err.to_string())
    }
}

/// Serialized form: `{"code": "NotFound", "message": "...", "rpc_code": -1}`.
#[derive(Serialize, Deserialize)]
struct WireStatus {
    code: StatusCode,
    #[serde(default)]
    message: String,
    #[serde(default = "no_rpc_code")]
    rpc_code: i32,
}

fn no_rpc_code() -> i32 {
    -1
}

impl From<Status> for WireStatus {
    fn from(status: Status) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_string(),
            rpc_code: status.rpc_code(),
        }
    }
}

impl From<WireStatus> for Status {
    #[track_caller]
    fn from(wire: WireStatus) -> Self {
        Status::build(wire.code, wire.message, wire.rpc_code, Location::caller())
    }
}
