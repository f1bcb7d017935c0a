use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{WorkerCommand, WorkerConfig, MASTER_ADDR_ENV};
use crate::error::Result;
use crate::store::{JobStore, WorkerId};
use crate::task::TaskRegistry;
use crate::worker::runner::{WorkerLoop, WorkerOutcome};
use crate::worker::SHUTDOWN_EXIT_CODE;

const SIGKILL: i32 = 9;

/// Exit notification for a spawned worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub worker_id: WorkerId,
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// The worker left on its own after idling out
    pub voluntary: bool,
}

impl WorkerExit {
    pub fn from_status(worker_id: WorkerId, status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            worker_id,
            code: status.code(),
            signal,
            voluntary: status.success(),
        }
    }
}

/// Master-side reference to a live worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub worker_id: WorkerId,
    pub pid: Option<u32>,
    kill: CancellationToken,
}

impl WorkerHandle {
    pub fn new(worker_id: WorkerId, pid: Option<u32>, kill: CancellationToken) -> Self {
        Self {
            worker_id,
            pid,
            kill,
        }
    }

    /// Request termination. The exit is still reported through the exit channel.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_cancelled()
    }
}

#[async_trait]
pub trait Spawner: Send + Sync {
    /// Start a worker. Its exit must be reported exactly once on `exits`.
    async fn spawn(
        &self,
        config: WorkerConfig,
        exits: mpsc::UnboundedSender<WorkerExit>,
    ) -> Result<WorkerHandle>;
}

/// Starts each worker as a child process connected to the master's store server.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    command: WorkerCommand,
    master_addr: SocketAddr,
}

impl ProcessSpawner {
    pub fn new(command: WorkerCommand, master_addr: SocketAddr) -> Self {
        Self {
            command,
            master_addr,
        }
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(
        &self,
        config: WorkerConfig,
        exits: mpsc::UnboundedSender<WorkerExit>,
    ) -> Result<WorkerHandle> {
        let worker_id = config.worker_id;
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .envs(config.env_overrides())
            .env(MASTER_ADDR_ENV, self.master_addr.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();
        tracing::info!(worker_id, pid = ?pid, "Spawned worker process");

        let kill = CancellationToken::new();
        let token = kill.clone();
        tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = token.cancelled() => None,
            };
            let status = match finished {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(worker_id, error = %e, "Failed to kill worker process");
                    }
                    child.wait().await
                }
            };

            let exit = match status {
                Ok(status) => WorkerExit::from_status(worker_id, status),
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "Failed to wait for worker process");
                    WorkerExit {
                        worker_id,
                        code: None,
                        signal: None,
                        voluntary: false,
                    }
                }
            };
            // Master gone; nobody left to tell
            let _ = exits.send(exit);
        });

        Ok(WorkerHandle::new(worker_id, pid, kill))
    }
}

/// Runs each worker loop as a tokio task in the current process.
pub struct InProcessSpawner {
    store: Arc<dyn JobStore>,
    registry: Arc<TaskRegistry>,
}

impl InProcessSpawner {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>) -> Self {
        Self { store, registry }
    }
}

#[async_trait]
impl Spawner for InProcessSpawner {
    async fn spawn(
        &self,
        config: WorkerConfig,
        exits: mpsc::UnboundedSender<WorkerExit>,
    ) -> Result<WorkerHandle> {
        let worker_id = config.worker_id;
        let worker = WorkerLoop::new(config, self.store.clone(), self.registry.clone());
        let mut task = tokio::spawn(async move { worker.run().await });

        let kill = CancellationToken::new();
        let token = kill.clone();
        tokio::spawn(async move {
            let joined = tokio::select! {
                joined = &mut task => Some(joined),
                _ = token.cancelled() => None,
            };

            let (code, signal) = match joined {
                Some(Ok(Ok(WorkerOutcome::IdleTimeout))) => (Some(0), None),
                Some(Ok(Ok(WorkerOutcome::Shutdown))) => (Some(SHUTDOWN_EXIT_CODE), None),
                Some(Ok(Err(e))) => {
                    tracing::error!(worker_id, error = %e, "Worker loop failed");
                    (Some(1), None)
                }
                Some(Err(e)) => {
                    tracing::error!(worker_id, error = %e, "Worker loop panicked");
                    (Some(101), None)
                }
                None => {
                    task.abort();
                    (None, Some(SIGKILL))
                }
            };
            let _ = exits.send(WorkerExit {
                worker_id,
                code,
                signal,
                voluntary: code == Some(0),
            });
        });

        Ok(WorkerHandle::new(worker_id, None, kill))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn only_a_clean_exit_is_voluntary() {
        let idle = WorkerExit::from_status(1, ExitStatus::from_raw(0));
        assert!(idle.voluntary);
        assert_eq!(idle.code, Some(0));

        let shut_down = WorkerExit::from_status(2, ExitStatus::from_raw(SHUTDOWN_EXIT_CODE << 8));
        assert!(!shut_down.voluntary);
        assert_eq!(shut_down.code, Some(SHUTDOWN_EXIT_CODE));

        let killed = WorkerExit::from_status(3, ExitStatus::from_raw(SIGKILL));
        assert!(!killed.voluntary);
        assert_eq!(killed.code, None);
        assert_eq!(killed.signal, Some(SIGKILL));
    }
}
