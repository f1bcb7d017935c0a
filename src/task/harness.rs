use std::future::Future;

use tokio::task::{JoinError, JoinSet};

/// Run `f` over every item concurrently and return the results in input order.
///
/// Each item gets its own tokio task; a single item is awaited inline. Waits
/// for every task before returning. A panicking task surfaces as the
/// `JoinError` of the first one observed.
pub async fn run_concurrently<T, R, F, Fut>(mut items: Vec<T>, f: F) -> Result<Vec<R>, JoinError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    if items.len() == 1 {
        if let Some(item) = items.pop() {
            return Ok(vec![f(item).await]);
        }
    }

    let len = items.len();
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let fut = f(item);
        set.spawn(async move { (index, fut.await) });
    }

    let mut slots: Vec<Option<R>> = (0..len).map(|_| None).collect();
    let mut failure = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, value)) => slots[index] = Some(value),
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Split `items` into contiguous groups of `size`; the last group holds the
/// remainder. A size of zero is treated as one.
pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(|group| group.to_vec()).collect()
}
