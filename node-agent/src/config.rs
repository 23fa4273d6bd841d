use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse env var {key}={value}: {reason}")]
    Parse {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the admin API listens on
    pub port: u16,
    /// Address workers on this node are reachable at
    pub node_ip_address: String,
    /// Grace period between SIGTERM and SIGKILL when a worker is killed
    pub kill_worker_timeout: Duration,
    /// How often exited workers are swept out of the registry
    pub reap_interval: Duration,
    /// Deadline for a single RPC to a worker
    pub rpc_call_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: env_parse("NODE_AGENT_PORT", 52365)?,
            node_ip_address: env_str("NODE_AGENT_IP", "127.0.0.1"),
            kill_worker_timeout: Duration::from_millis(env_parse("KILL_WORKER_TIMEOUT_MS", 100)?),
            reap_interval: Duration::from_millis(env_parse("WORKER_REAP_INTERVAL_MS", 1000)?),
            rpc_call_timeout: Duration::from_millis(env_parse("RPC_CALL_TIMEOUT_MS", 30_000)?),
        })
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            kill_worker_timeout: self.kill_worker_timeout,
        }
    }
}

/// The part of the configuration a single worker consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub kill_worker_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            kill_worker_timeout: Duration::from_millis(100),
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val.parse::<T>().map_err(|e| ConfigError::Parse {
            key,
            reason: e.to_string(),
            value: val,
        }),
        Err(_) => Ok(default),
    }
}
