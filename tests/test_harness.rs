//! Shared helpers for pool integration tests.
//!
//! Runs a master against an in-memory store with workers as tokio tasks, so
//! tests exercise the full claim/complete cycle without spawning processes.

#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use procpool::builtin;
use procpool::config::PoolConfig;
use procpool::master::Master;
use procpool::store::{JobStore, MemoryStore};
use procpool::task::{TaskContext, TaskRegistry};
use procpool::worker::InProcessSpawner;

/// Pool settings with short timings for faster tests
pub fn test_config() -> PoolConfig {
    PoolConfig::default()
        .with_pool_size(4)
        .with_polling_interval(Duration::from_millis(10))
        .with_worker_timeout(Duration::from_secs(5))
}

/// Built-in tasks plus a few test-only ones
pub fn test_registry() -> TaskRegistry {
    let mut registry = builtin::registry();
    registry
        .register_fn("double", |x: i64| Ok::<_, Infallible>(x * 2))
        .register("hang", |_: serde_json::Value, _ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, Infallible>(())
        });
    registry
}

/// Handle to a running in-process pool
pub struct TestPool {
    pub master: Master,
    pub store: Arc<MemoryStore>,
}

impl TestPool {
    pub async fn start(config: PoolConfig) -> Self {
        Self::start_with(config, test_registry()).await
    }

    pub async fn start_with(config: PoolConfig, registry: TaskRegistry) -> Self {
        let store = Arc::new(MemoryStore::new());
        let spawner = InProcessSpawner::new(store.clone(), Arc::new(registry));
        let master = Master::start(config, store.clone(), Arc::new(spawner))
            .await
            .expect("master should start");
        Self { master, store }
    }

    pub fn dyn_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub async fn shutdown(self) {
        self.master.shutdown().await;
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
