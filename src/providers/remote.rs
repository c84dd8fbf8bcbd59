use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    app_context::AppState,
    event::EventBus,
    protocol::{CommandHandler, RemoteProtocolServer},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Remote control service provider.
///
/// Binds the configured listen address and serves the line protocol. The
/// daemon is useless without it, so a bind failure aborts startup.
///
/// # Priority and Criticality
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes
pub struct RemoteControlServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl RemoteControlServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for RemoteControlServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let listen = self.state.config().await.remote.listen.clone();
        let handler =
            CommandHandler::new(self.state.registry.clone()).with_event_bus(self.event_bus.clone());
        let server = RemoteProtocolServer::bind(&listen, handler)
            .await?
            .with_event_bus(self.event_bus.clone());

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                server.run(cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "RemoteControlService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}
