use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PoolError, Result};
use crate::store::WorkerId;

pub const MASTER_ADDR_ENV: &str = "PROCPOOL_MASTER_ADDR";
pub const WORKER_ID_ENV: &str = "PROCPOOL_WORKER_ID";
pub const POLLING_INTERVAL_ENV: &str = "PROCPOOL_POLLING_INTERVAL_MS";
pub const WORKER_TIMEOUT_ENV: &str = "PROCPOOL_WORKER_TIMEOUT_MS";

pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 100;
pub const DEFAULT_WORKER_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CHUNK_SIZE: usize = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Master-side configuration. Read-only once the pool has started.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live workers
    pub pool_size: usize,
    /// Idle wait between claim attempts when the queue is empty
    pub polling_interval: Duration,
    /// A worker that runs no job for this long exits
    pub worker_timeout: Duration,
    /// Default number of items per job for `map`
    pub chunk_size: usize,
    /// Kill the worker running a job for longer than this
    pub job_timeout: Option<Duration>,
    /// Claims allowed per job before an orphaned job is failed instead of requeued
    pub max_attempts: u32,
    /// Address the store server binds to
    pub listen_addr: SocketAddr,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            worker_timeout: Duration::from_millis(DEFAULT_WORKER_TIMEOUT_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            job_timeout: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

impl PoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PoolError::Config("pool_size must be at least 1".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(PoolError::InvalidChunkSize);
        }
        if self.max_attempts == 0 {
            return Err(PoolError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings handed to worker `worker_id`.
    pub fn worker(&self, worker_id: WorkerId) -> WorkerConfig {
        WorkerConfig {
            worker_id,
            polling_interval: self.polling_interval,
            worker_timeout: self.worker_timeout,
        }
    }
}

/// Per-worker settings, passed to worker processes through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub worker_id: WorkerId,
    pub polling_interval: Duration,
    pub worker_timeout: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            worker_timeout: Duration::from_millis(DEFAULT_WORKER_TIMEOUT_MS),
        }
    }

    /// Environment overrides for a spawned worker process.
    pub fn env_overrides(&self) -> Vec<(&'static str, String)> {
        vec![
            (WORKER_ID_ENV, self.worker_id.to_string()),
            (
                POLLING_INTERVAL_ENV,
                self.polling_interval.as_millis().to_string(),
            ),
            (
                WORKER_TIMEOUT_ENV,
                self.worker_timeout.as_millis().to_string(),
            ),
        ]
    }
}

/// Everything a worker process needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProcessConfig {
    pub master_addr: SocketAddr,
    pub worker: WorkerConfig,
}

impl WorkerProcessConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse settings from `lookup`. The master address and worker id are
    /// required; intervals fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| PoolError::Config(format!("{} is not set", key)))
        };
        let invalid = |key: &str, value: &str| {
            PoolError::Config(format!("{} has invalid value {:?}", key, value))
        };
        let millis = |key: &str, default: u64| -> Result<Duration> {
            match lookup(key) {
                Some(value) => value
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(|_| invalid(key, &value)),
                None => Ok(Duration::from_millis(default)),
            }
        };

        let addr = required(MASTER_ADDR_ENV)?;
        let master_addr: SocketAddr = addr
            .parse()
            .map_err(|_| invalid(MASTER_ADDR_ENV, &addr))?;
        let id = required(WORKER_ID_ENV)?;
        let worker_id: WorkerId = id.parse().map_err(|_| invalid(WORKER_ID_ENV, &id))?;

        Ok(Self {
            master_addr,
            worker: WorkerConfig {
                worker_id,
                polling_interval: millis(POLLING_INTERVAL_ENV, DEFAULT_POLLING_INTERVAL_MS)?,
                worker_timeout: millis(WORKER_TIMEOUT_ENV, DEFAULT_WORKER_TIMEOUT_MS)?,
            },
        })
    }
}

/// Program started for each worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-run the current executable with the `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?).with_arg("worker"))
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn pool_config_default() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.pool_size, num_cpus::get());
        assert_eq!(cfg.polling_interval, Duration::from_millis(100));
        assert_eq!(cfg.worker_timeout, Duration::from_millis(60_000));
        assert_eq!(cfg.chunk_size, 5);
        assert!(cfg.job_timeout.is_none());
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:0");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pool_config_builders() {
        let cfg = PoolConfig::default()
            .with_pool_size(4)
            .with_polling_interval(Duration::from_millis(10))
            .with_worker_timeout(Duration::from_secs(1))
            .with_chunk_size(7)
            .with_job_timeout(Duration::from_secs(5))
            .with_max_attempts(1);
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.polling_interval, Duration::from_millis(10));
        assert_eq!(cfg.worker_timeout, Duration::from_secs(1));
        assert_eq!(cfg.chunk_size, 7);
        assert_eq!(cfg.job_timeout, Some(Duration::from_secs(5)));
        assert_eq!(cfg.max_attempts, 1);
    }

    #[test]
    fn pool_config_rejects_zero_values() {
        assert!(PoolConfig::default().with_pool_size(0).validate().is_err());
        assert!(matches!(
            PoolConfig::default().with_chunk_size(0).validate(),
            Err(PoolError::InvalidChunkSize)
        ));
        assert!(PoolConfig::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn worker_config_inherits_pool_timings() {
        let cfg = PoolConfig::default()
            .with_polling_interval(Duration::from_millis(25))
            .with_worker_timeout(Duration::from_millis(500));
        let worker = cfg.worker(3);
        assert_eq!(worker.worker_id, 3);
        assert_eq!(worker.polling_interval, Duration::from_millis(25));
        assert_eq!(worker.worker_timeout, Duration::from_millis(500));
    }

    #[test]
    fn env_overrides_round_trip_through_lookup() {
        let worker = WorkerConfig {
            worker_id: 9,
            polling_interval: Duration::from_millis(20),
            worker_timeout: Duration::from_millis(750),
        };
        let mut pairs: Vec<(&str, String)> = worker.env_overrides();
        pairs.push((MASTER_ADDR_ENV, "127.0.0.1:4000".to_string()));
        let borrowed: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let parsed = WorkerProcessConfig::from_lookup(lookup(&borrowed)).unwrap();
        assert_eq!(parsed.master_addr.to_string(), "127.0.0.1:4000");
        assert_eq!(parsed.worker, worker);
    }

    #[test]
    fn worker_process_config_defaults_intervals() {
        let parsed = WorkerProcessConfig::from_lookup(lookup(&[
            (MASTER_ADDR_ENV, "127.0.0.1:5000"),
            (WORKER_ID_ENV, "2"),
        ]))
        .unwrap();
        assert_eq!(parsed.worker, WorkerConfig::new(2));
    }

    #[test]
    fn worker_process_config_requires_master_addr() {
        let err = WorkerProcessConfig::from_lookup(lookup(&[(WORKER_ID_ENV, "1")])).unwrap_err();
        assert!(err.to_string().contains(MASTER_ADDR_ENV));
    }

    #[test]
    fn worker_process_config_rejects_bad_values() {
        assert!(WorkerProcessConfig::from_lookup(lookup(&[
            (MASTER_ADDR_ENV, "not-an-addr"),
            (WORKER_ID_ENV, "1"),
        ]))
        .is_err());
        assert!(WorkerProcessConfig::from_lookup(lookup(&[
            (MASTER_ADDR_ENV, "127.0.0.1:5000"),
            (WORKER_ID_ENV, "one"),
        ]))
        .is_err());
        assert!(WorkerProcessConfig::from_lookup(lookup(&[
            (MASTER_ADDR_ENV, "127.0.0.1:5000"),
            (WORKER_ID_ENV, "1"),
            (POLLING_INTERVAL_ENV, "fast"),
        ]))
        .is_err());
    }

    #[test]
    fn worker_command_current_exe_runs_worker_subcommand() {
        let cmd = WorkerCommand::current_exe().unwrap();
        assert_eq!(cmd.args, vec!["worker".to_string()]);
        assert!(cmd.program.is_absolute());
    }
}
