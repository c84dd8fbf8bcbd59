//! Bus transport seam: addressed requests out, typed events back.
//!
//! A [`BusTransport`] never blocks waiting for a device. Every request
//! returns a [`TransactionId`] immediately and the answer (or the loss of
//! the transaction) is delivered later as a [`BusEvent`] on the channel the
//! transport was built with.

pub mod simulated;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Result, bail};
use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{BusCfg, BusKind};

/// Correlation token for one request on one bus.
pub type TransactionId = u64;

/// Identifier of a bus line as configured.
pub type BusId = u32;

/// Address of a byte in the device EEPROM.
pub type EepromAddress = u8;

/// Status registers that can be read from a fan controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    MotorStatusLowByte,
    MotorStatusHighByte,
    Warnings,
    DcVoltage,
    DcCurrent,
    TemperatureOfPowerModule,
    SetPoint,
    ActualValue,
    ModeOfControl,
    DirectionOfRotation,
    PwmDutyCycle,
    SteppingSwitch12,
    SteppingSwitch34,
    TemperatureOfMotor,
    LineVoltage,
    LineCurrent,
    MaxVolumetricFlowRate,
    MinVolumetricFlowRate,
    MaxPressure,
    MinPressure,
    ElectronicBoxTemperature,
    EepromChecksumLsb,
    EepromChecksumMsb,
}

impl StatusKind {
    /// The six status reads issued by a status refresh, in issue order.
    pub const REFRESH: [StatusKind; 6] = [
        StatusKind::MotorStatusLowByte,
        StatusKind::MotorStatusHighByte,
        StatusKind::Warnings,
        StatusKind::DcVoltage,
        StatusKind::DcCurrent,
        StatusKind::TemperatureOfPowerModule,
    ];
}

/// Asynchronous outcome of a bus request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    TransactionLost {
        id: TransactionId,
    },
    SimpleStatus {
        id: TransactionId,
        address: u8,
        group: u8,
        status: String,
    },
    Status {
        id: TransactionId,
        address: u8,
        group: u8,
        kind: StatusKind,
        text: String,
        raw: u8,
    },
    ActualSpeed {
        id: TransactionId,
        address: u8,
        group: u8,
        raw: u8,
    },
    SetpointAcknowledged {
        id: TransactionId,
        address: u8,
        group: u8,
    },
    EepromWritten {
        id: TransactionId,
        address: u8,
        group: u8,
    },
    EepromData {
        id: TransactionId,
        address: u8,
        group: u8,
        eeprom_address: EepromAddress,
        data: u8,
    },
}

impl BusEvent {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            BusEvent::TransactionLost { id }
            | BusEvent::SimpleStatus { id, .. }
            | BusEvent::Status { id, .. }
            | BusEvent::ActualSpeed { id, .. }
            | BusEvent::SetpointAcknowledged { id, .. }
            | BusEvent::EepromWritten { id, .. }
            | BusEvent::EepromData { id, .. } => *id,
        }
    }

    /// Returns the `(address, group)` the response came from.
    ///
    /// A lost transaction carries no origin.
    pub fn origin(&self) -> Option<(u8, u8)> {
        match self {
            BusEvent::TransactionLost { .. } => None,
            BusEvent::SimpleStatus { address, group, .. }
            | BusEvent::Status { address, group, .. }
            | BusEvent::ActualSpeed { address, group, .. }
            | BusEvent::SetpointAcknowledged { address, group, .. }
            | BusEvent::EepromWritten { address, group, .. }
            | BusEvent::EepromData { address, group, .. } => Some((*address, *group)),
        }
    }
}

/// Request side of a fan bus.
///
/// Implementations must return promptly; the answer is delivered as a
/// [`BusEvent`] carrying the returned identifier.
#[cfg_attr(test, mockall::automock)]
pub trait BusTransport: Send + Sync {
    fn set_speed_setpoint(&self, address: u8, group: u8, raw: u8) -> TransactionId;

    fn get_actual_speed(&self, address: u8, group: u8) -> TransactionId;

    fn get_status(&self, address: u8, group: u8, kind: StatusKind) -> TransactionId;

    fn read_eeprom(&self, address: u8, group: u8, eeprom_address: EepromAddress) -> TransactionId;

    fn write_eeprom(
        &self,
        address: u8,
        group: u8,
        eeprom_address: EepromAddress,
        data: u8,
    ) -> TransactionId;
}

/// Allocator shared by every bus so identifiers never collide across lines.
#[derive(Debug, Clone, Default)]
pub struct TransactionIds(Arc<AtomicU64>);

impl TransactionIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next identifier, starting at 1.
    pub fn next(&self) -> TransactionId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// All configured buses, addressable by their [`BusId`].
#[derive(Clone, Default)]
pub struct BusSystem {
    buses: HashMap<BusId, Arc<dyn BusTransport>>,
    transaction_ids: TransactionIds,
}

impl BusSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the buses described in the configuration.
    ///
    /// Every transport delivers its events to `events`.
    pub fn from_config(buses: &[BusCfg], events: UnboundedSender<BusEvent>) -> Result<Self> {
        let mut system = Self::new();

        for cfg in buses {
            if system.buses.contains_key(&cfg.id) {
                bail!("Bus {} configured twice", cfg.id);
            }

            let transport: Arc<dyn BusTransport> = match cfg.kind {
                BusKind::Simulated => Arc::new(simulated::SimulatedBus::new(
                    cfg.id,
                    system.transaction_ids.clone(),
                    events.clone(),
                )),
            };
            info!("Bus {} ready ({:?})", cfg.id, cfg.kind);
            system.buses.insert(cfg.id, transport);
        }

        Ok(system)
    }

    /// Registers a transport under `id`, replacing any previous one.
    pub fn insert(&mut self, id: BusId, transport: Arc<dyn BusTransport>) {
        self.buses.insert(id, transport);
    }

    pub fn bus(&self, id: BusId) -> Option<Arc<dyn BusTransport>> {
        self.buses.get(&id).cloned()
    }

    /// The allocator handed to transports built by this system.
    pub fn transaction_ids(&self) -> TransactionIds {
        self.transaction_ids.clone()
    }

    /// Configured bus identifiers in ascending order.
    pub fn ids(&self) -> Vec<BusId> {
        let mut ids: Vec<_> = self.buses.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    #[test]
    fn transaction_ids_are_unique_across_clones() {
        let ids = TransactionIds::new();
        let other = ids.clone();

        let issued: HashSet<_> = (0..100)
            .flat_map(|_| [ids.next(), other.next()])
            .collect();

        assert_eq!(issued.len(), 200);
        assert!(!issued.contains(&0));
    }

    #[test]
    fn bus_system_resolves_configured_buses() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cfg = vec![
            BusCfg { id: 2, kind: BusKind::Simulated },
            BusCfg { id: 0, kind: BusKind::Simulated },
        ];

        let system = BusSystem::from_config(&cfg, tx).unwrap();

        assert!(system.bus(0).is_some());
        assert!(system.bus(2).is_some());
        assert!(system.bus(1).is_none());
        assert_eq!(system.ids(), vec![0, 2]);
    }

    #[test]
    fn bus_system_rejects_duplicate_ids() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cfg = vec![
            BusCfg { id: 1, kind: BusKind::Simulated },
            BusCfg { id: 1, kind: BusKind::Simulated },
        ];

        let result = BusSystem::from_config(&cfg, tx);
        assert!(result.is_err());
    }

    #[test]
    fn event_accessors_expose_id_and_origin() {
        let event = BusEvent::Status {
            id: 9,
            address: 3,
            group: 1,
            kind: StatusKind::Warnings,
            text: String::new(),
            raw: 0,
        };
        assert_eq!(event.transaction_id(), 9);
        assert_eq!(event.origin(), Some((3, 1)));

        let lost = BusEvent::TransactionLost { id: 4 };
        assert_eq!(lost.transaction_id(), 4);
        assert_eq!(lost.origin(), None);
    }
}
