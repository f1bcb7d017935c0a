pub mod builtin;
pub mod config;
pub mod error;
pub mod grpc;
pub mod master;
pub mod pool;
pub mod shutdown;
pub mod store;
pub mod task;
pub mod worker;

pub use error::{PoolError, Result};
pub use master::{wait, wait_all, JobHandle, Master};
pub use pool::Pool;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("pool");
}
