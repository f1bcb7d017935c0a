use thiserror::Error;
use uuid::Uuid;

use crate::store::JobStatus;
use crate::task::TaskError;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Job already exists: {0}")]
    DuplicateJob(Uuid),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id} failed: {error}")]
    JobFailed { id: Uuid, error: String },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Pool is shut down")]
    ShutDown,

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Serialization error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;

impl From<PoolError> for tonic::Status {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::DuplicateJob(_) => tonic::Status::already_exists(err.to_string()),
            PoolError::InvalidTransition { .. } => {
                tonic::Status::failed_precondition(err.to_string())
            }
            PoolError::GrpcError(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
