use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::error::Result;
use crate::grpc::store_service::StoreServiceImpl;
use crate::proto::store_service_server::StoreServiceServer;
use crate::store::JobStore;

pub struct StoreServer {
    store: Arc<dyn JobStore>,
}

impl StoreServer {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Bind `addr` and serve in the background until `shutdown` is cancelled.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    pub async fn bind(
        self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let service = StoreServiceImpl::new(self.store);

        tracing::info!(addr = %local_addr, "Starting store server");

        let handle = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(StoreServiceServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    shutdown.cancelled().await
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Store server failed");
            }
        });

        Ok((local_addr, handle))
    }
}
