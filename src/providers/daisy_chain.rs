use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::time::interval;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::DaisyChainCfg,
    daisy_chain::AddressingCoordinator,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Daisy-chain polling service provider.
///
/// Spawns one poll loop per configured daisy chain. Each loop samples the
/// chain input and publishes [`Event::DaisyChainResponse`] on every level
/// change. The loops never touch the network or the buses.
///
/// # Priority and Criticality
///
/// - **Priority**: 5
/// - **Critical**: No
pub struct DaisyChainServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl DaisyChainServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for DaisyChainServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let chains = self.state.config().await.daisy_chains.clone();
        if chains.is_empty() {
            info!("No daisy chains configured");
            return Ok(());
        }

        for chain in chains {
            let coordinator = AddressingCoordinator::new(
                chain.bus,
                self.state.io.clone(),
                chain.input_bit,
                chain.output_bit,
            );
            let event_bus = self.event_bus.clone();
            task_manager
                .spawn_task(
                    format!("{}[{}]", self.name(), chain.bus),
                    move |cancel_token| async move {
                        run_daisy_chain(coordinator, &chain, event_bus, cancel_token).await
                    },
                )
                .await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DaisyChainService"
    }

    fn priority(&self) -> i32 {
        5
    }
}

async fn run_daisy_chain(
    mut coordinator: AddressingCoordinator,
    cfg: &DaisyChainCfg,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut ticks = IntervalStream::new(interval(cfg.poll_interval()));
    coordinator.set_output(false);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Daisy chain {} polling cancelled", coordinator.chain());
                break;
            }
            tick = ticks.next() => {
                if tick.is_none() {
                    break;
                }
                let Some(level) = coordinator.poll() else {
                    continue;
                };
                let event = Event::DaisyChainResponse {
                    chain: coordinator.chain(),
                    level,
                };
                if event_bus.publish(event).is_err() {
                    debug!("No subscriber for daisy chain {}", coordinator.chain());
                }
            }
        }
    }
    Ok(())
}
