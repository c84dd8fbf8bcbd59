use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Base trait for providers that build a component asynchronously.
///
/// # Example
///
/// ```no_run
/// use ffu_controld::providers::traits::AsyncProvider;
///
/// struct ListenAddress;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<String> for ListenAddress {
///     async fn provide(&self) -> anyhow::Result<String> {
///         Ok("0.0.0.0:16001".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Trait for services that are started through the [`TaskManager`].
///
/// Services start in descending priority. A critical service that fails to
/// start aborts startup; any other failure is logged and skipped.
///
/// # Example
///
/// ```no_run
/// use ffu_controld::providers::traits::ServiceProvider;
/// use ffu_controld::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct Heartbeat;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for Heartbeat {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task("heartbeat".to_string(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         }).await
///     }
///
///     fn name(&self) -> &'static str { "Heartbeat" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Spawns the service tasks.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    fn name(&self) -> &'static str;

    /// Higher numbers start first.
    fn priority(&self) -> i32 {
        0
    }

    fn is_critical(&self) -> bool {
        false
    }
}
