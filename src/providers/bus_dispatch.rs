use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState, bus::BusEvent, providers::traits::ServiceProvider,
    registry::DeviceRegistry, task_manager::TaskManager,
};

/// Bus event dispatch service provider.
///
/// Drains the event channel every bus writes to and routes each event to
/// its device through the registry correlation table.
///
/// # Priority and Criticality
///
/// - **Priority**: 9
/// - **Critical**: Yes (no telemetry without it)
pub struct BusDispatchServiceProvider {
    state: Arc<AppState>,
}

impl BusDispatchServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for BusDispatchServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let events = self
            .state
            .take_bus_events()
            .await
            .ok_or_else(|| anyhow!("Bus event channel already taken"))?;
        let registry = self.state.registry.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_bus_dispatch(registry, events, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "BusDispatchService"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn is_critical(&self) -> bool {
        true
    }
}

pub(crate) async fn run_bus_dispatch(
    registry: Arc<RwLock<DeviceRegistry>>,
    mut events: mpsc::UnboundedReceiver<BusEvent>,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Bus dispatch service cancelled");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    info!("All buses closed, bus dispatch service stops");
                    break;
                };
                if registry.write().await.dispatch(&event).is_none() {
                    debug!("Unattributed bus event {event:?}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{BusSystem, simulated::SimulatedBus},
        device::Property,
    };
    use pretty_assertions::assert_eq;
    use tokio::time::{Duration, sleep};

    #[tokio::test]
    async fn routes_responses_until_cancelled() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut buses = BusSystem::new();
        let bus = SimulatedBus::new(0, buses.transaction_ids(), tx).without_jitter();
        buses.insert(0, Arc::new(bus));
        let registry = Arc::new(RwLock::new(DeviceRegistry::new(Arc::new(buses), None)));
        {
            let mut registry = registry.write().await;
            registry.add(1).unwrap();
            for (property, value) in [
                (Property::BusId, "0"),
                (Property::FanAddress, "2"),
                (Property::FanGroup, "1"),
                (Property::RawSpeed, "90"),
            ] {
                registry.set_property(1, property, value).unwrap();
            }
            registry.request_status(1).unwrap();
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(run_bus_dispatch(registry.clone(), rx, token.clone()));

        for _ in 0..100 {
            if registry.read().await.pending_transactions() == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        task.await.unwrap().unwrap();

        let registry = registry.read().await;
        assert_eq!(registry.pending_transactions(), 0);
        assert_eq!(registry.lookup(1).unwrap().actual_data().speed_reading, 90);
    }
}
