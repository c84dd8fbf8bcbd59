//! In-process fan bus.
//!
//! Answers every request immediately through the event channel, tracking a
//! setpoint and an EEPROM image per `(address, group)`. Speed readings
//! follow the setpoint with a small random variation.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use log::debug;
use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;

use super::{BusEvent, BusId, BusTransport, EepromAddress, StatusKind, TransactionId, TransactionIds};

/// Maximum deviation of a speed reading from the setpoint, in raw steps.
pub const SPEED_JITTER: u8 = 2;

/// Nominal DC link voltage reported by every simulated fan (raw).
const DC_VOLTAGE_RAW: u8 = 0x9B;

/// Nominal power module temperature (raw, degrees Celsius).
const POWER_MODULE_TEMPERATURE: u8 = 38;

#[derive(Debug, Default)]
struct SimulatedFan {
    setpoint: u8,
    eeprom: HashMap<EepromAddress, u8>,
}

/// A bus whose devices live in memory.
#[derive(Debug)]
pub struct SimulatedBus {
    id: BusId,
    transaction_ids: TransactionIds,
    events: UnboundedSender<BusEvent>,
    fans: Mutex<HashMap<(u8, u8), SimulatedFan>>,
    jitter: u8,
}

impl SimulatedBus {
    pub fn new(id: BusId, transaction_ids: TransactionIds, events: UnboundedSender<BusEvent>) -> Self {
        Self {
            id,
            transaction_ids,
            events,
            fans: Mutex::new(HashMap::new()),
            jitter: SPEED_JITTER,
        }
    }

    /// Disables the random variation of speed readings.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0;
        self
    }

    fn fans(&self) -> MutexGuard<'_, HashMap<(u8, u8), SimulatedFan>> {
        // A poisoned map only means a previous request panicked mid-update.
        self.fans.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn respond(&self, event: BusEvent) -> TransactionId {
        let id = event.transaction_id();
        if self.events.send(event).is_err() {
            debug!("Bus {}: no event consumer, response {id} discarded", self.id);
        }
        id
    }

    fn speed_reading(&self, setpoint: u8) -> u8 {
        if self.jitter == 0 {
            return setpoint;
        }
        let jitter = i16::from(self.jitter);
        let offset = rand::rng().random_range(-jitter..=jitter);
        (i16::from(setpoint) + offset).clamp(0, 255) as u8
    }

    fn status_value(&self, address: u8, group: u8, kind: StatusKind) -> (String, u8) {
        let setpoint = self
            .fans()
            .get(&(address, group))
            .map_or(0, |fan| fan.setpoint);

        match kind {
            StatusKind::MotorStatusLowByte | StatusKind::MotorStatusHighByte => {
                (String::from("OK"), 0)
            }
            StatusKind::Warnings => (String::from("No warnings"), 0),
            StatusKind::DcVoltage => (String::new(), DC_VOLTAGE_RAW),
            StatusKind::DcCurrent => (String::new(), setpoint / 16),
            StatusKind::TemperatureOfPowerModule => (String::new(), POWER_MODULE_TEMPERATURE),
            StatusKind::SetPoint | StatusKind::ActualValue => (String::new(), setpoint),
            _ => (String::new(), 0),
        }
    }
}

impl BusTransport for SimulatedBus {
    fn set_speed_setpoint(&self, address: u8, group: u8, raw: u8) -> TransactionId {
        let id = self.transaction_ids.next();
        self.fans().entry((address, group)).or_default().setpoint = raw;
        self.respond(BusEvent::SetpointAcknowledged { id, address, group })
    }

    fn get_actual_speed(&self, address: u8, group: u8) -> TransactionId {
        let id = self.transaction_ids.next();
        let setpoint = self
            .fans()
            .get(&(address, group))
            .map_or(0, |fan| fan.setpoint);
        let raw = self.speed_reading(setpoint);
        self.respond(BusEvent::ActualSpeed { id, address, group, raw })
    }

    fn get_status(&self, address: u8, group: u8, kind: StatusKind) -> TransactionId {
        let id = self.transaction_ids.next();
        let (text, raw) = self.status_value(address, group, kind);
        self.respond(BusEvent::Status {
            id,
            address,
            group,
            kind,
            text,
            raw,
        })
    }

    fn read_eeprom(&self, address: u8, group: u8, eeprom_address: EepromAddress) -> TransactionId {
        let id = self.transaction_ids.next();
        let data = self
            .fans()
            .get(&(address, group))
            .and_then(|fan| fan.eeprom.get(&eeprom_address).copied())
            .unwrap_or(0xFF);
        self.respond(BusEvent::EepromData {
            id,
            address,
            group,
            eeprom_address,
            data,
        })
    }

    fn write_eeprom(
        &self,
        address: u8,
        group: u8,
        eeprom_address: EepromAddress,
        data: u8,
    ) -> TransactionId {
        let id = self.transaction_ids.next();
        self.fans()
            .entry((address, group))
            .or_default()
            .eeprom
            .insert(eeprom_address, data);
        self.respond(BusEvent::EepromWritten { id, address, group })
    }
}
