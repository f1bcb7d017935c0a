use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};

use crate::grpc::convert::{
    filter_from_proto, job_from_proto, job_to_proto, parse_id, status_from_proto,
    transition_from_proto,
};
use crate::proto::store_service_server::StoreService;
use crate::proto::{
    ConditionalUpdateRequest, ConditionalUpdateResponse, CountResponse, FindOneResponse,
    FindRequest, FindResponse, InsertRequest, InsertResponse, JobRecord as ProtoJobRecord,
    RemoveRequest, RemoveResponse,
};
use crate::store::{Expected, JobStore};

/// Serves a [`JobStore`] to worker processes.
pub struct StoreServiceImpl {
    store: Arc<dyn JobStore>,
}

impl StoreServiceImpl {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

type JobStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<ProtoJobRecord, Status>> + Send>>;

#[tonic::async_trait]
impl StoreService for StoreServiceImpl {
    type WatchStream = JobStream;

    async fn insert(
        &self,
        request: Request<InsertRequest>,
    ) -> Result<Response<InsertResponse>, Status> {
        let job = request
            .into_inner()
            .job
            .ok_or_else(|| Status::invalid_argument("Missing job"))?;
        let job = job_from_proto(job).map_err(|e| Status::invalid_argument(e.to_string()))?;

        let id = self.store.insert(job).await?;
        Ok(Response::new(InsertResponse { id: id.to_string() }))
    }

    async fn conditional_update(
        &self,
        request: Request<ConditionalUpdateRequest>,
    ) -> Result<Response<ConditionalUpdateResponse>, Status> {
        let req = request.into_inner();
        let id = parse_id(&req.id).map_err(|_| Status::invalid_argument("Invalid job ID"))?;
        let expected = Expected {
            status: status_from_proto(req.expected_status)
                .map_err(|e| Status::invalid_argument(e.to_string()))?,
            worker: req.expected_worker,
        };
        let transition = transition_from_proto(req.transition)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let updated = self
            .store
            .conditional_update(id, expected, transition)
            .await?;
        Ok(Response::new(ConditionalUpdateResponse { updated }))
    }

    async fn find(&self, request: Request<FindRequest>) -> Result<Response<FindResponse>, Status> {
        let filter = filter_from_proto(request.into_inner().filter)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let jobs = self.store.find(filter).await?;
        Ok(Response::new(FindResponse {
            jobs: jobs.iter().map(job_to_proto).collect(),
        }))
    }

    async fn find_one(
        &self,
        request: Request<FindRequest>,
    ) -> Result<Response<FindOneResponse>, Status> {
        let filter = filter_from_proto(request.into_inner().filter)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let job = self.store.find_one(filter).await?;
        Ok(Response::new(FindOneResponse {
            job: job.as_ref().map(job_to_proto),
        }))
    }

    async fn count(&self, request: Request<FindRequest>) -> Result<Response<CountResponse>, Status> {
        let filter = filter_from_proto(request.into_inner().filter)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let count = self.store.count(filter).await?;
        Ok(Response::new(CountResponse {
            count: count as u64,
        }))
    }

    async fn remove(
        &self,
        request: Request<RemoveRequest>,
    ) -> Result<Response<RemoveResponse>, Status> {
        let id = parse_id(&request.into_inner().id)
            .map_err(|_| Status::invalid_argument("Invalid job ID"))?;
        let removed = self.store.remove(id).await?;
        Ok(Response::new(RemoveResponse { removed }))
    }

    async fn watch(
        &self,
        request: Request<FindRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let filter = filter_from_proto(request.into_inner().filter)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let rx = self.store.watch(filter).await?;

        let stream =
            UnboundedReceiverStream::new(rx).map(|job| Ok::<_, Status>(job_to_proto(&job)));
        Ok(Response::new(Box::pin(stream) as Self::WatchStream))
    }
}
