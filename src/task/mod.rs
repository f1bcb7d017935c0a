//! Task transport.
//!
//! Jobs do not carry code. A job names a handler registered in a
//! [`TaskRegistry`] and carries its parameters as JSON. The worker resolves
//! the name back into a handler and invokes it. Master and workers must be
//! built with the same registry for a name to resolve.
//!
//! A batch call carries a JSON array; the handler runs once per element
//! through [`harness::run_concurrently`] and the results come back as an
//! array in the same order.

pub mod harness;

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinError;

use crate::store::{JobId, WorkerId};

pub use harness::{chunk, run_concurrently};

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid params for task {task}: {source}")]
    InvalidParams {
        task: String,
        source: serde_json::Error,
    },

    #[error("Task {task} failed: {message}")]
    Failed { task: String, message: String },

    #[error("Task {task} panicked: {message}")]
    Panicked { task: String, message: String },

    #[error("Failed to encode task data: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TaskError {
    pub fn panicked(task: &str, err: JoinError) -> Self {
        let message = if err.is_panic() {
            let payload = err.into_panic();
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            }
        } else {
            "task was cancelled".to_string()
        };
        TaskError::Panicked {
            task: task.to_string(),
            message,
        }
    }
}

/// Transportable form of a task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCall {
    pub task: String,
    pub params: String,
    pub batch: bool,
}

impl TaskCall {
    pub fn single<P: Serialize + ?Sized>(
        task: impl Into<String>,
        params: &P,
    ) -> Result<Self, TaskError> {
        Ok(Self {
            task: task.into(),
            params: serde_json::to_string(params)?,
            batch: false,
        })
    }

    pub fn batch<T: Serialize>(task: impl Into<String>, items: &[T]) -> Result<Self, TaskError> {
        Ok(Self {
            task: task.into(),
            params: serde_json::to_string(items)?,
            batch: true,
        })
    }
}

/// Where an invocation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub worker_id: WorkerId,
    pub job_id: JobId,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<Value, TaskError>> + Send>>;
pub type Handler = Arc<dyn Fn(Value, TaskContext) -> TaskFuture + Send + Sync>;

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler. A later registration under the same name wins.
    pub fn register<P, R, E, F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let name = name.into();
        let task = name.clone();
        let handler: Handler = Arc::new(move |value: Value, ctx: TaskContext| {
            let task = task.clone();
            match serde_json::from_value::<P>(value) {
                Ok(params) => {
                    let fut = f(params, ctx);
                    Box::pin(async move {
                        match fut.await {
                            Ok(output) => serde_json::to_value(output).map_err(TaskError::from),
                            Err(e) => Err(TaskError::Failed {
                                task,
                                message: e.to_string(),
                            }),
                        }
                    }) as TaskFuture
                }
                Err(source) => Box::pin(async move {
                    Err::<Value, _>(TaskError::InvalidParams { task, source })
                }) as TaskFuture,
            }
        });
        self.handlers.insert(name, handler);
        self
    }

    /// Register a synchronous handler that does not need the context.
    pub fn register_fn<P, R, E, F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(P) -> Result<R, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        // Runs when polled, so a panic lands in the task that drives it
        self.register(name, move |params: P, _ctx: TaskContext| {
            let f = f.clone();
            async move { f(params) }
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn resolve(&self, name: &str) -> Result<Handler, TaskError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::UnknownTask(name.to_string()))
    }

    /// Decode `call`, run it, and encode the result as JSON text.
    pub async fn invoke(&self, call: &TaskCall, ctx: TaskContext) -> Result<String, TaskError> {
        let handler = self.resolve(&call.task)?;
        let decode_err = |source| TaskError::InvalidParams {
            task: call.task.clone(),
            source,
        };

        let output = if call.batch {
            let items: Vec<Value> = serde_json::from_str(&call.params).map_err(decode_err)?;
            let results = run_concurrently(items, |item| handler(item, ctx))
                .await
                .map_err(|e| TaskError::panicked(&call.task, e))?;
            Value::Array(results.into_iter().collect::<Result<Vec<_>, _>>()?)
        } else {
            let params: Value = serde_json::from_str(&call.params).map_err(decode_err)?;
            handler(params, ctx).await?
        };

        Ok(serde_json::to_string(&output)?)
    }
}
