use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::error::{PoolError, Result};
use crate::store::JobId;

/// Final state of a job as reported to its handle: the JSON result text or
/// the recorded error.
pub(crate) type Outcome = std::result::Result<String, String>;

/// Future for the result of one submitted job.
///
/// Resolves once the job is completed or failed. If the master shuts down
/// first it resolves with [`PoolError::ShutDown`].
#[derive(Debug)]
pub struct JobHandle<R> {
    id: JobId,
    rx: oneshot::Receiver<Outcome>,
    _result: PhantomData<fn() -> R>,
}

impl<R> JobHandle<R> {
    pub(crate) fn new(id: JobId, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            id,
            rx,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }
}

impl<R: DeserializeOwned> Future for JobHandle<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(result))) => {
                Poll::Ready(serde_json::from_str(&result).map_err(PoolError::from))
            }
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(PoolError::JobFailed {
                id: this.id,
                error,
            })),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::ShutDown)),
        }
    }
}

/// Wait for a single job.
pub async fn wait<R: DeserializeOwned>(handle: JobHandle<R>) -> Result<R> {
    handle.await
}

/// Wait for every job, returning results in the order of `handles`.
///
/// Stops at the first failure.
pub async fn wait_all<R: DeserializeOwned>(handles: Vec<JobHandle<R>>) -> Result<Vec<R>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn resolves_with_decoded_result() {
        let (tx, rx) = oneshot::channel();
        let handle: JobHandle<Vec<u32>> = JobHandle::new(Uuid::new_v4(), rx);
        tx.send(Ok("[1,4,9]".to_string())).unwrap();
        assert_eq!(handle.await.unwrap(), vec![1, 4, 9]);
    }

    #[tokio::test]
    async fn failure_carries_job_id() {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let handle: JobHandle<u32> = JobHandle::new(id, rx);
        tx.send(Err("boom".to_string())).unwrap();
        match handle.await {
            Err(PoolError::JobFailed { id: failed, error }) => {
                assert_eq!(failed, id);
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropped_sender_means_shutdown() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let handle: JobHandle<u32> = JobHandle::new(Uuid::new_v4(), rx);
        drop(tx);
        assert!(matches!(handle.await, Err(PoolError::ShutDown)));
    }

    #[tokio::test]
    async fn wait_all_keeps_order() {
        let mut senders = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            senders.push(tx);
            handles.push(JobHandle::<u32>::new(Uuid::new_v4(), rx));
        }
        for (i, tx) in senders.into_iter().enumerate().rev() {
            tx.send(Ok(i.to_string())).unwrap();
        }
        assert_eq!(wait_all(handles).await.unwrap(), vec![0, 1, 2]);
    }
}
