//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::error::RecvError,
};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, BusDispatchServiceProvider, DaisyChainServiceProvider,
        RemoteControlServiceProvider, ServiceProvider, StatusPollServiceProvider,
    },
    task_manager::TaskManager,
};

/// Owns the services of the daemon from startup to shutdown.
///
/// Services are started in priority order. Critical services must start;
/// the others may fail without stopping the daemon.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Builds the shared state and registers the service providers.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.shared_state = Some(state.clone());

        self.register_service_providers(state);

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    fn register_service_providers(&mut self, state: Arc<AppState>) {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(RemoteControlServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(BusDispatchServiceProvider::new(state.clone())),
            Box::new(DaisyChainServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(StatusPollServiceProvider::new(state)),
        ];

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {}",
                        provider.name(),
                        e
                    );
                }
            }
        }

        info!("All critical services started");
        Ok(())
    }

    /// Runs until Ctrl+C, SIGTERM or a [`Event::SystemShutdown`].
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }
                event = event_rx.recv() => {
                    if !self.handle_event(event)? {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns whether the main loop should keep running.
    fn handle_event(&self, event: Result<Event, RecvError>) -> Result<bool> {
        match event {
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return Ok(false);
            }
            Ok(Event::DaisyChainResponse { chain, level }) => {
                info!("Daisy chain {chain} responded with level {level}");
            }
            Ok(Event::DeviceAdded(id)) => info!("FFU #{id} registered"),
            Ok(Event::ConnectionClosed(peer)) => debug!("Client {peer} disconnected"),
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
            Err(RecvError::Lagged(n)) => warn!("Event bus lagged by {n} messages"),
        }
        Ok(true)
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            log::error!("Error during task shutdown: {e:#}");
        }

        if let Some(state) = &self.shared_state {
            let saved = state.registry.write().await.save_all();
            if saved > 0 {
                info!("Saved {saved} pending FFU records");
            }
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Shared state, available after [`initialize`](Self::initialize).
    pub fn state(&self) -> Result<Arc<AppState>> {
        self.shared_state
            .clone()
            .ok_or_else(|| anyhow!("System not properly initialized"))
    }

    pub fn registered_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusCfg, BusKind, Config};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::time::{Duration, timeout};

    fn config_manager(dir: &TempDir) -> ConfigManager {
        config_manager_listening(dir, "127.0.0.1:0")
    }

    fn config_manager_listening(dir: &TempDir, listen: &str) -> ConfigManager {
        let mut config = Config::default();
        config.remote.listen = listen.to_string();
        config.storage.directory = dir.path().to_path_buf();
        config.buses = vec![BusCfg {
            id: 0,
            kind: BusKind::Simulated,
        }];
        ConfigManager::new(config, PathBuf::from("/tmp/ffu_controld-test.yml"))
    }

    #[tokio::test]
    async fn initialize_registers_services_by_priority() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = SystemCoordinator::new();
        assert!(coordinator.state().is_err());

        coordinator.initialize(config_manager(&dir)).await.unwrap();

        assert!(coordinator.state().is_ok());
        assert_eq!(
            coordinator.registered_services(),
            vec![
                "RemoteControlService",
                "BusDispatchService",
                "DaisyChainService",
                "StatusPollService",
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_event_ends_main_loop() {
        let dir = TempDir::new().unwrap();
        let mut coordinator = SystemCoordinator::new();
        coordinator.initialize(config_manager(&dir)).await.unwrap();
        coordinator.start_all_services().await.unwrap();

        let event_bus = coordinator.event_bus().clone();
        tokio::spawn(async move {
            // Repeat until the main loop has subscribed.
            for _ in 0..100 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                event_bus.publish(Event::SystemShutdown).ok();
            }
        });

        timeout(Duration::from_secs(15), coordinator.run_main_loop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn critical_start_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let manager = config_manager_listening(&dir, "127.0.0.1:not-a-port");
        let mut coordinator = SystemCoordinator::new();
        coordinator.initialize(manager).await.unwrap();

        let error = coordinator.start_all_services().await.unwrap_err();

        assert!(error.to_string().contains("RemoteControlService"));
    }
}
