use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, WorkerCommand};
use crate::error::{PoolError, Result};
use crate::grpc::StoreServer;
use crate::master::Master;
use crate::store::MemoryStore;
use crate::worker::ProcessSpawner;

/// A master with its store server and process spawner.
///
/// Dereferences to [`Master`] for `submit` and `map`.
pub struct Pool {
    master: Master,
    store: Arc<MemoryStore>,
    addr: SocketAddr,
    server: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Pool {
    /// Start serving the job store and a master that spawns workers with
    /// `command`.
    pub async fn launch(config: PoolConfig, command: WorkerCommand) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let (addr, server) = StoreServer::new(store.clone())
            .bind(config.listen_addr, shutdown.child_token())
            .await?;

        let spawner = ProcessSpawner::new(command, addr);
        let master = match Master::start(config, store.clone(), Arc::new(spawner)).await {
            Ok(master) => master,
            Err(e) => {
                shutdown.cancel();
                return Err(e);
            }
        };

        tracing::info!(addr = %addr, "Pool launched");
        Ok(Self {
            master,
            store,
            addr,
            server,
            shutdown,
        })
    }

    pub fn master(&self) -> &Master {
        &self.master
    }

    /// Address workers connect to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Kill the workers, then stop the store server.
    pub async fn shutdown(self) -> Result<()> {
        self.master.shutdown().await;
        self.shutdown.cancel();
        self.server
            .await
            .map_err(|e| PoolError::Internal(format!("store server task failed: {}", e)))
    }
}

impl Deref for Pool {
    type Target = Master;

    fn deref(&self) -> &Master {
        &self.master
    }
}
