//! Task handler port.
//!
//! Payloads are untyped (`serde_json::Value`); each task name is bound to
//! a typed handler through the registry, so no single global payload type
//! is forced on callers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

/// Executable behavior behind a task name.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the handler against the task payload.
    ///
    /// A returned error marks the task failed; the error is captured by
    /// the worker and never propagated out of the worker loop.
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync,
{
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        (self.0)(payload).await
    }
}

/// Name-to-handler dispatch table shared by all workers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a task name, replacing any previous binding.
    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    /// Convenience wrapper for closure handlers.
    pub async fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(f))).await;
    }

    /// Remove a binding. Returns whether one existed.
    pub async fn unregister(&self, name: &str) -> bool {
        self.handlers.write().await.remove(name).is_some()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}
