//! Logical fan-filter unit (FFU) bound to an address on a bus.
//!
//! A [`Device`] owns its configuration, the telemetry last reported by the
//! bus and the identifiers of the transactions it is still waiting for.
//! Requests go out through the [`BusSystem`]; responses come back through
//! [`Device::on_response`] once the registry has matched them by
//! transaction identifier.

pub mod property;
pub mod record;

use std::{
    collections::{HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    bus::{BusEvent, BusId, BusSystem, BusTransport, StatusKind, TransactionId},
    error::{ControlError, ControlResult},
};

pub use property::Property;
pub use record::DeviceRecord;

/// Identifier of a device, unique within the registry.
pub type DeviceId = i32;

/// Number of lost transaction identifiers kept per device.
const LOST_HISTORY: usize = 32;

/// Full scale of the raw setpoint.
const RAW_FULL_SCALE: f64 = 255.0;

/// Telemetry cached from the most recent bus responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualData {
    pub speed_reading: u8,
    pub speed_setpoint: u8,
    pub status_raw_lsb: u8,
    pub status_raw_msb: u8,
    pub status_string_lsb: String,
    pub status_string_msb: String,
    pub warnings: u8,
    pub dc_voltage: u8,
    pub dc_current: u8,
    pub temperature_of_power_module: u8,
}

impl ActualData {
    /// Renders the telemetry as space separated `key=value` tokens.
    pub fn render(&self) -> String {
        format!(
            "speedReading={} speedSetpoint={} statusRaw_LSB={:02x} statusRaw_MSB={:02x} \
             statusString={}{} warnings={:02x} dcVoltage={} dcCurrent={} temperatureOfPowerModule={}",
            self.speed_reading,
            self.speed_setpoint,
            self.status_raw_lsb,
            self.status_raw_msb,
            self.status_string_lsb,
            self.status_string_msb,
            self.warnings,
            self.dc_voltage,
            self.dc_current,
            self.temperature_of_power_module,
        )
    }
}

/// Whether a device still waits for bus responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    RequestsInFlight,
}

pub struct Device {
    id: DeviceId,
    bus_id: Option<BusId>,
    fan_address: Option<u8>,
    fan_group: Option<u8>,
    speed_max_rpm: f64,
    setpoint_speed_raw: u8,
    actual: ActualData,
    outstanding: HashSet<TransactionId>,
    lost: VecDeque<TransactionId>,
    dirty: bool,
    autosave: bool,
    directory: Option<PathBuf>,
    buses: Arc<BusSystem>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("bus_id", &self.bus_id)
            .field("fan_address", &self.fan_address)
            .field("fan_group", &self.fan_group)
            .field("speed_max_rpm", &self.speed_max_rpm)
            .field("setpoint_speed_raw", &self.setpoint_speed_raw)
            .field("outstanding", &self.outstanding.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Creates an unaddressed device with autosave enabled.
    pub fn new(id: DeviceId, buses: Arc<BusSystem>) -> Self {
        Self {
            id,
            bus_id: None,
            fan_address: None,
            fan_group: None,
            speed_max_rpm: 0.0,
            setpoint_speed_raw: 0,
            actual: ActualData::default(),
            outstanding: HashSet::new(),
            lost: VecDeque::new(),
            dirty: false,
            autosave: true,
            directory: None,
            buses,
        }
    }

    /// Restores a device from its record file.
    ///
    /// The device keeps persisting into the directory it was loaded from.
    pub fn load(path: &Path, buses: Arc<BusSystem>) -> ControlResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ControlError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        let line = content.lines().next().unwrap_or_default();
        let record = DeviceRecord::parse(line).map_err(|reason| ControlError::RecordFormat {
            path: path.to_path_buf(),
            reason,
        })?;

        let mut device = Self::new(record.id, buses);
        device.apply_record(&record);
        device.directory = path.parent().map(Path::to_path_buf);
        Ok(device)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn bus_id(&self) -> Option<BusId> {
        self.bus_id
    }

    pub fn fan_address(&self) -> Option<u8> {
        self.fan_address
    }

    pub fn fan_group(&self) -> Option<u8> {
        self.fan_group
    }

    pub fn speed_max_rpm(&self) -> f64 {
        self.speed_max_rpm
    }

    pub fn setpoint_raw(&self) -> u8 {
        self.setpoint_speed_raw
    }

    pub fn actual_data(&self) -> &ActualData {
        &self.actual
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Transactions declared lost by the bus, most recent last.
    pub fn lost_transactions(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.lost.iter().copied()
    }

    pub fn request_state(&self) -> RequestState {
        if self.outstanding.is_empty() {
            RequestState::Idle
        } else {
            RequestState::RequestsInFlight
        }
    }

    pub fn set_autosave(&mut self, on: bool) {
        self.autosave = on;
    }

    /// Sets the directory records are written to, creating it if needed.
    pub fn set_file_directory(&mut self, directory: impl Into<PathBuf>) -> ControlResult<()> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| ControlError::Persistence {
            path: directory.clone(),
            source,
        })?;
        self.directory = Some(directory);
        Ok(())
    }

    /// Path of this device's record, if a directory is configured.
    pub fn record_path(&self) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|dir| dir.join(DeviceRecord::file_name(self.id)))
    }

    pub fn set_bus_id(&mut self, bus_id: Option<BusId>) {
        if self.bus_id != bus_id {
            self.bus_id = bus_id;
            self.mark_changed();
        }
    }

    pub fn set_fan_address(&mut self, address: Option<u8>) {
        if self.fan_address != address {
            self.fan_address = address;
            self.mark_changed();
        }
    }

    pub fn set_fan_group(&mut self, group: Option<u8>) {
        if self.fan_group != group {
            self.fan_group = group;
            self.mark_changed();
        }
    }

    pub fn set_max_rpm(&mut self, max_rpm: f64) {
        if self.speed_max_rpm != max_rpm {
            self.speed_max_rpm = max_rpm;
            self.mark_changed();
        }
    }

    /// Converts an rpm value to the raw 0..=255 scale.
    pub fn rpm_to_raw(&self, rpm: f64) -> ControlResult<u8> {
        if !(self.speed_max_rpm > 0.0) {
            return Err(ControlError::InvalidConfiguration {
                id: self.id,
                reason: format!("maximum rpm is {:.2}", self.speed_max_rpm),
            });
        }
        let raw = (rpm / self.speed_max_rpm * RAW_FULL_SCALE).round();
        Ok(raw.clamp(0.0, RAW_FULL_SCALE) as u8)
    }

    pub fn raw_to_rpm(&self, raw: u8) -> f64 {
        f64::from(raw) / RAW_FULL_SCALE * self.speed_max_rpm
    }

    /// Current setpoint in rpm, rounded to the nearest integer.
    pub fn speed_setpoint_rpm(&self) -> i64 {
        self.raw_to_rpm(self.setpoint_speed_raw).round() as i64
    }

    /// Sets the speed setpoint in rpm.
    ///
    /// Returns the identifier of the issued write, if any.
    pub fn set_setpoint(&mut self, rpm: f64) -> ControlResult<Option<TransactionId>> {
        let raw = self.rpm_to_raw(rpm)?;
        if raw == self.setpoint_speed_raw {
            return Ok(None);
        }
        self.set_setpoint_raw(raw)
    }

    /// Sets the raw speed setpoint and sends it to the fan.
    ///
    /// An unchanged value is a no-op. The new value is kept and persisted
    /// even when the write cannot be sent; an unresolvable bus is reported
    /// as [`ControlError::BusNotFound`].
    pub fn set_setpoint_raw(&mut self, raw: u8) -> ControlResult<Option<TransactionId>> {
        if raw == self.setpoint_speed_raw {
            return Ok(None);
        }
        self.setpoint_speed_raw = raw;
        self.mark_changed();

        let Some((bus_id, address, group)) = self.bus_target() else {
            debug!("FFU #{} not addressed, setpoint {raw} kept locally", self.id);
            return Ok(None);
        };
        let bus = self.resolve_bus(bus_id)?;

        let id = bus.set_speed_setpoint(address, group, raw);
        self.outstanding.insert(id);
        Ok(Some(id))
    }

    /// Requests actual speed and six status registers from the fan.
    ///
    /// Returns the seven new transaction identifiers.
    pub fn request_status(&mut self) -> ControlResult<Vec<TransactionId>> {
        let (bus_id, address, group) =
            self.bus_target()
                .ok_or_else(|| ControlError::InvalidConfiguration {
                    id: self.id,
                    reason: String::from("bus, address and group must be configured"),
                })?;
        let bus = self.resolve_bus(bus_id)?;

        let mut issued = Vec::with_capacity(1 + StatusKind::REFRESH.len());
        issued.push(bus.get_actual_speed(address, group));
        issued.extend(
            StatusKind::REFRESH
                .iter()
                .map(|kind| bus.get_status(address, group, *kind)),
        );

        self.outstanding.extend(issued.iter().copied());
        Ok(issued)
    }

    /// Returns whether `id` is one of this device's outstanding requests.
    pub fn acknowledge_outstanding(&mut self, id: TransactionId, remove_on_match: bool) -> bool {
        if remove_on_match {
            self.outstanding.remove(&id)
        } else {
            self.outstanding.contains(&id)
        }
    }

    /// Records a transaction the bus gave up on. No retry is attempted.
    pub fn on_transaction_lost(&mut self, id: TransactionId) {
        self.outstanding.remove(&id);
        if self.lost.len() == LOST_HISTORY {
            self.lost.pop_front();
        }
        self.lost.push_back(id);
        warn!("FFU #{}: {}", self.id, ControlError::TransactionLost(id));
    }

    /// Applies a bus response addressed to this device.
    ///
    /// Returns `false` when address or group do not match, in which case
    /// nothing is changed.
    pub fn on_response(&mut self, event: &BusEvent) -> bool {
        let Some((address, group)) = event.origin() else {
            return false;
        };
        if self.fan_address != Some(address) || self.fan_group != Some(group) {
            return false;
        }

        match event {
            BusEvent::ActualSpeed { raw, .. } => self.actual.speed_reading = *raw,
            BusEvent::Status { kind, text, raw, .. } => self.apply_status(*kind, text, *raw),
            BusEvent::SetpointAcknowledged { id, .. } => {
                debug!("FFU #{}: setpoint acknowledged ({id})", self.id);
            }
            BusEvent::EepromWritten { id, .. } => {
                debug!("FFU #{}: EEPROM written ({id})", self.id);
            }
            BusEvent::EepromData {
                eeprom_address,
                data,
                ..
            } => {
                debug!(
                    "FFU #{}: EEPROM[{eeprom_address:#04x}] = {data:#04x}",
                    self.id
                );
            }
            BusEvent::SimpleStatus { .. } | BusEvent::TransactionLost { .. } => {}
        }
        true
    }

    fn apply_status(&mut self, kind: StatusKind, text: &str, raw: u8) {
        let actual = &mut self.actual;
        match kind {
            StatusKind::MotorStatusLowByte => {
                actual.status_raw_lsb = raw;
                actual.status_string_lsb = text.to_string();
            }
            StatusKind::MotorStatusHighByte => {
                actual.status_raw_msb = raw;
                actual.status_string_msb = text.to_string();
            }
            StatusKind::Warnings => actual.warnings = raw,
            StatusKind::DcVoltage => actual.dc_voltage = raw,
            StatusKind::DcCurrent => actual.dc_current = raw,
            StatusKind::TemperatureOfPowerModule => actual.temperature_of_power_module = raw,
            StatusKind::SetPoint => actual.speed_setpoint = raw,
            other => debug!("FFU #{}: status {other:?} ignored", self.id),
        }
    }

    /// Writes the record if the device changed since the last save.
    ///
    /// Returns whether a record was written.
    pub fn save(&mut self) -> ControlResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let Some(path) = self.record_path() else {
            return Ok(false);
        };

        let tmp_path = path.with_extension("csv.tmp");
        let persistence = |source| ControlError::Persistence {
            path: path.clone(),
            source,
        };
        fs::write(&tmp_path, self.record().to_string()).map_err(persistence)?;
        fs::rename(&tmp_path, &path).map_err(persistence)?;

        self.dirty = false;
        debug!("FFU #{} saved to {}", self.id, path.display());
        Ok(true)
    }

    /// Removes the record file of this device.
    pub fn delete_record(&self) -> ControlResult<()> {
        let Some(path) = self.record_path() else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted record {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ControlError::Persistence { path, source }),
        }
    }

    pub fn record(&self) -> DeviceRecord {
        DeviceRecord {
            id: self.id,
            bus: self.bus_id,
            fan_address: self.fan_address,
            fan_group: self.fan_group,
            speed_max_rpm: self.speed_max_rpm,
            setpoint_speed_raw: self.setpoint_speed_raw,
        }
    }

    fn apply_record(&mut self, record: &DeviceRecord) {
        self.id = record.id;
        self.bus_id = record.bus;
        self.fan_address = record.fan_address;
        self.fan_group = record.fan_group;
        self.speed_max_rpm = record.speed_max_rpm;
        self.setpoint_speed_raw = record.setpoint_speed_raw;
        self.dirty = false;
    }

    /// Marks the device dirty and saves it when autosave is on.
    pub(crate) fn mark_changed(&mut self) {
        self.dirty = true;
        if self.autosave {
            if let Err(e) = self.save() {
                warn!("FFU #{}: {e}", self.id);
            }
        }
    }

    fn bus_target(&self) -> Option<(BusId, u8, u8)> {
        let bus_id = self.bus_id?;
        let address = self.fan_address.filter(|a| *a >= 1)?;
        let group = self.fan_group.filter(|g| *g >= 1)?;
        Some((bus_id, address, group))
    }

    fn resolve_bus(&self, bus_id: BusId) -> ControlResult<Arc<dyn BusTransport>> {
        self.buses
            .bus(bus_id)
            .ok_or(ControlError::BusNotFound(bus_id))
    }
}
