//! Tasks shipped with the `procpool` binary.
//!
//! A worker process can only run tasks its own registry knows, so the binary
//! registers this set in both roles.

use std::convert::Infallible;
use std::time::Duration;

use serde_json::Value;

use crate::task::{TaskContext, TaskRegistry};

pub fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register(&mut registry);
    registry
}

/// Add the built-in tasks to `registry`.
pub fn register(registry: &mut TaskRegistry) {
    registry
        .register_fn("square", |x: i64| {
            x.checked_mul(x)
                .ok_or_else(|| format!("{} squared overflows", x))
        })
        .register_fn("arch", |_: Value| {
            Ok::<_, Infallible>(std::env::consts::ARCH)
        })
        .register_fn("join_values", |value: Value| {
            Ok::<_, Infallible>(join_values(&value))
        })
        .register_fn("echo", Ok::<Value, Infallible>)
        .register("worker_id", |_: Value, ctx: TaskContext| async move {
            Ok::<_, Infallible>(ctx.worker_id)
        })
        .register_fn("process_id", |_: Value| {
            Ok::<_, Infallible>(std::process::id())
        })
        .register("sleep", |millis: u64, _ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, Infallible>(millis)
        })
        .register_fn("fail", |value: Value| {
            Err::<Value, _>(format!("refusing {}", value))
        })
        .register_fn("panic", |value: Value| -> Result<Value, Infallible> {
            panic!("panic task called with {}", value)
        });
}

/// Values of an object or array joined with ", ". Scalars are rendered alone.
fn join_values(value: &Value) -> String {
    let render = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match value {
        Value::Object(map) => map.values().map(render).collect::<Vec<_>>().join(", "),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(", "),
        other => render(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registers_every_builtin() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec![
                "arch",
                "echo",
                "fail",
                "join_values",
                "panic",
                "process_id",
                "sleep",
                "square",
                "worker_id"
            ]
        );
    }

    #[test]
    fn join_values_renders_objects_and_arrays() {
        assert_eq!(join_values(&json!({ "name": "lucas" })), "lucas");
        assert_eq!(join_values(&json!(["a", 1, true])), "a, 1, true");
        assert_eq!(join_values(&json!(7)), "7");
    }
}
