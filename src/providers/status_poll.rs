use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::{sync::Arc, time::Duration};
use tokio::{sync::RwLock, time::interval};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState, providers::traits::ServiceProvider, registry::DeviceRegistry,
    task_manager::TaskManager,
};

/// Periodic status refresh service provider.
///
/// Requests speed and status of every addressed device on a fixed
/// interval. Responses come back through the bus dispatch service.
///
/// # Priority and Criticality
///
/// - **Priority**: 3
/// - **Critical**: No
pub struct StatusPollServiceProvider {
    state: Arc<AppState>,
}

impl StatusPollServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for StatusPollServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let Some(period) = self.state.config().await.status_poll_interval() else {
            info!("Periodic status refresh disabled");
            return Ok(());
        };
        let registry = self.state.registry.clone();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_status_poll(registry, period, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "StatusPollService"
    }

    fn priority(&self) -> i32 {
        3
    }
}

async fn run_status_poll(
    registry: Arc<RwLock<DeviceRegistry>>,
    period: Duration,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut interval = interval(period);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Status poll service cancelled");
                break;
            }
            _instant = interval.tick() => {
                let issued = registry.write().await.request_status_all();
                debug!("Status refresh issued {issued} requests");
            }
        }
    }
    Ok(())
}
