//! Application state shared by all services.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::{
    bus::{BusEvent, BusSystem},
    config::{Config, ConfigManager},
    daisy_chain::{DigitalIo, MemoryIo},
    registry::DeviceRegistry,
};

/// Shared application state containing all runtime data.
///
/// The registry is the only mutable domain state; it sits behind a single
/// lock so that mutations and persistence never interleave.
pub struct AppState {
    pub config_manager: Arc<ConfigManager>,
    pub buses: Arc<BusSystem>,
    pub registry: Arc<RwLock<DeviceRegistry>>,
    /// Digital I/O the daisy-chain interfaces are wired to.
    pub io: Arc<dyn DigitalIo>,
    bus_events: Mutex<Option<mpsc::UnboundedReceiver<BusEvent>>>,
}

impl AppState {
    /// Builds the buses and loads the persisted devices.
    pub async fn new(config_manager: ConfigManager) -> Result<Self> {
        Self::with_io(config_manager, Arc::new(MemoryIo::new())).await
    }

    pub async fn with_io(config_manager: ConfigManager, io: Arc<dyn DigitalIo>) -> Result<Self> {
        let config = config_manager.clone_config().await;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let buses = Arc::new(
            BusSystem::from_config(&config.buses, events_tx)
                .context("Failed to initialize buses")?,
        );

        let mut registry =
            DeviceRegistry::new(buses.clone(), Some(config.storage.directory.clone()));
        let loaded = registry
            .load_from_directory()
            .context("Failed to load device records")?;
        info!(
            "{loaded} FFUs on {} buses ready",
            buses.ids().len()
        );

        Ok(Self {
            config_manager: Arc::new(config_manager),
            buses,
            registry: Arc::new(RwLock::new(registry)),
            io,
            bus_events: Mutex::new(Some(events_rx)),
        })
    }

    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    /// Hands out the receiving end of the bus event channel.
    ///
    /// Only the first caller gets it.
    pub async fn take_bus_events(&self) -> Option<mpsc::UnboundedReceiver<BusEvent>> {
        self.bus_events.lock().await.take()
    }
}
