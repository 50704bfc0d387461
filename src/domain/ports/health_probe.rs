//! Health probe port.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// A liveness check for one agent.
///
/// Returns `Ok(true)` when the agent is healthy, `Ok(false)` when it is
/// reachable but failing, and `Err` when the probe itself broke; errors
/// are captured into the check result rather than propagated.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<bool>;
}

/// Adapter turning an async closure into a [`HealthProbe`].
pub struct FnProbe<F>(F);

impl<F> FnProbe<F>
where
    F: Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> HealthProbe for FnProbe<F>
where
    F: Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync,
{
    async fn check(&self) -> Result<bool> {
        (self.0)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_probe() {
        let probe = FnProbe::new(|| Box::pin(async { Ok(true) }));
        assert!(tokio_test::block_on(probe.check()).unwrap());

        let failing = FnProbe::new(|| Box::pin(async { anyhow::bail!("unreachable") }));
        assert!(tokio_test::block_on(failing.check()).is_err());
    }
}
