use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tonic::transport::{Channel, Endpoint};

use crate::error::Result;
use crate::grpc::convert::{
    filter_to_proto, job_from_proto, job_to_proto, parse_id, status_to_proto,
    transition_to_proto,
};
use crate::proto::store_service_client::StoreServiceClient;
use crate::proto::{ConditionalUpdateRequest, FindRequest, InsertRequest, RemoveRequest};
use crate::store::{Expected, JobFilter, JobId, JobRecord, JobStore, Transition};

/// [`JobStore`] backed by the master's store server.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: StoreServiceClient<Channel>,
}

impl RemoteStore {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let channel = Endpoint::from_shared(format!("http://{}", addr))?
            .connect()
            .await?;
        Ok(Self {
            client: StoreServiceClient::new(channel),
        })
    }

    fn find_request(filter: &JobFilter) -> FindRequest {
        FindRequest {
            filter: Some(filter_to_proto(filter)),
        }
    }
}

#[async_trait]
impl JobStore for RemoteStore {
    async fn insert(&self, job: JobRecord) -> Result<JobId> {
        let response = self
            .client
            .clone()
            .insert(InsertRequest {
                job: Some(job_to_proto(&job)),
            })
            .await?
            .into_inner();
        parse_id(&response.id)
    }

    async fn conditional_update(
        &self,
        id: JobId,
        expected: Expected,
        transition: Transition,
    ) -> Result<bool> {
        let response = self
            .client
            .clone()
            .conditional_update(ConditionalUpdateRequest {
                id: id.to_string(),
                expected_status: status_to_proto(expected.status) as i32,
                expected_worker: expected.worker,
                transition: Some(transition_to_proto(&transition)),
            })
            .await?
            .into_inner();
        Ok(response.updated)
    }

    async fn find(&self, filter: JobFilter) -> Result<Vec<JobRecord>> {
        let response = self
            .client
            .clone()
            .find(Self::find_request(&filter))
            .await?
            .into_inner();
        response.jobs.into_iter().map(job_from_proto).collect()
    }

    async fn find_one(&self, filter: JobFilter) -> Result<Option<JobRecord>> {
        let response = self
            .client
            .clone()
            .find_one(Self::find_request(&filter))
            .await?
            .into_inner();
        response.job.map(job_from_proto).transpose()
    }

    async fn count(&self, filter: JobFilter) -> Result<usize> {
        let response = self
            .client
            .clone()
            .count(Self::find_request(&filter))
            .await?
            .into_inner();
        Ok(response.count as usize)
    }

    async fn remove(&self, id: JobId) -> Result<bool> {
        let response = self
            .client
            .clone()
            .remove(RemoveRequest { id: id.to_string() })
            .await?
            .into_inner();
        Ok(response.removed)
    }

    async fn watch(&self, filter: JobFilter) -> Result<mpsc::UnboundedReceiver<JobRecord>> {
        let mut stream = self
            .client
            .clone()
            .watch(Self::find_request(&filter))
            .await?
            .into_inner();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(job)) => match job_from_proto(job) {
                        Ok(job) => {
                            if tx.send(job).is_err() {
                                // Subscriber dropped
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropping malformed job record"),
                    },
                    Ok(None) => break,
                    Err(status) => {
                        tracing::warn!(error = %status, "Watch stream ended with error");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}
