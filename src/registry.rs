//! Registry of all configured devices and the transaction correlation table.
//!
//! The registry is the single owner of every [`Device`]. It remembers which
//! device issued each outstanding transaction so that a [`BusEvent`] can be
//! routed to exactly one device without asking every device in turn.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    bus::{BusEvent, BusSystem, TransactionId},
    device::{Device, DeviceId, DeviceRecord, Property},
    error::{ControlError, ControlResult},
};

pub struct DeviceRegistry {
    devices: Vec<Device>,
    correlation: HashMap<TransactionId, DeviceId>,
    directory: Option<PathBuf>,
    buses: Arc<BusSystem>,
}

impl DeviceRegistry {
    /// Creates an empty registry persisting records into `directory`.
    pub fn new(buses: Arc<BusSystem>, directory: Option<PathBuf>) -> Self {
        Self {
            devices: Vec::new(),
            correlation: HashMap::new(),
            directory,
            buses,
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Instantiates one device per record found in the storage directory.
    ///
    /// Records are loaded in file name order. Unreadable records and
    /// duplicate identifiers are logged and skipped.
    pub fn load_from_directory(&mut self) -> ControlResult<usize> {
        let Some(directory) = self.directory.clone() else {
            return Ok(0);
        };
        if !directory.exists() {
            info!("Storage directory {} does not exist yet", directory.display());
            return Ok(0);
        }

        let persistence = |source| ControlError::Persistence {
            path: directory.clone(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(&directory).map_err(persistence)? {
            let path = entry.map_err(persistence)?.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(DeviceRecord::is_record_file);
            if is_record {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match Device::load(&path, self.buses.clone()) {
                Ok(device) if self.lookup(device.id()).is_some() => {
                    warn!(
                        "Skipping {}: {}",
                        path.display(),
                        ControlError::DuplicateId(device.id())
                    );
                }
                Ok(device) => {
                    debug!("Loaded FFU #{} from {}", device.id(), path.display());
                    self.devices.push(device);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping record: {e}"),
            }
        }

        info!("Loaded {loaded} FFUs from {}", directory.display());
        Ok(loaded)
    }

    /// Registers a new device and persists its record.
    pub fn add(&mut self, id: DeviceId) -> ControlResult<&mut Device> {
        if self.lookup(id).is_some() {
            return Err(ControlError::DuplicateId(id));
        }

        let mut device = Device::new(id, self.buses.clone());
        if let Some(directory) = &self.directory {
            if let Err(e) = device.set_file_directory(directory) {
                warn!("FFU #{id} will not be persisted: {e}");
            }
        }
        device.mark_changed();

        info!("Added FFU #{id}");
        let index = self.devices.len();
        self.devices.push(device);
        Ok(&mut self.devices[index])
    }

    pub fn lookup(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|device| device.id() == id)
    }

    pub fn lookup_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|device| device.id() == id)
    }

    /// All devices in registration order.
    pub fn list(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Removes a device together with its record and pending transactions.
    pub fn remove(&mut self, id: DeviceId) -> ControlResult<Device> {
        let position = self
            .devices
            .iter()
            .position(|device| device.id() == id)
            .ok_or(ControlError::UnknownDevice(id))?;
        let device = self.devices.remove(position);

        self.correlation.retain(|_, owner| *owner != id);
        if let Err(e) = device.delete_record() {
            warn!("FFU #{id}: {e}");
        }

        info!("Removed FFU #{id}");
        Ok(device)
    }

    /// Writes a property of a device through the property table.
    pub fn set_property(
        &mut self,
        id: DeviceId,
        property: Property,
        value: &str,
    ) -> ControlResult<()> {
        let device = self.lookup_mut(id).ok_or(ControlError::UnknownDevice(id))?;
        let issued = property.write(device, value)?;
        self.track(id, issued);
        Ok(())
    }

    pub fn set_setpoint(&mut self, id: DeviceId, rpm: f64) -> ControlResult<()> {
        let device = self.lookup_mut(id).ok_or(ControlError::UnknownDevice(id))?;
        let issued = device.set_setpoint(rpm)?;
        self.track(id, issued);
        Ok(())
    }

    pub fn set_setpoint_raw(&mut self, id: DeviceId, raw: u8) -> ControlResult<()> {
        let device = self.lookup_mut(id).ok_or(ControlError::UnknownDevice(id))?;
        let issued = device.set_setpoint_raw(raw)?;
        self.track(id, issued);
        Ok(())
    }

    /// Starts a status refresh of one device.
    ///
    /// Returns the number of transactions issued.
    pub fn request_status(&mut self, id: DeviceId) -> ControlResult<usize> {
        let device = self.lookup_mut(id).ok_or(ControlError::UnknownDevice(id))?;
        let issued = device.request_status()?;
        let count = issued.len();
        self.track(id, issued);
        Ok(count)
    }

    /// Starts a status refresh of every addressed device.
    pub fn request_status_all(&mut self) -> usize {
        let ids: Vec<_> = self.devices.iter().map(Device::id).collect();
        ids.into_iter()
            .map(|id| match self.request_status(id) {
                Ok(count) => count,
                Err(e) => {
                    debug!("Status refresh of FFU #{id} skipped: {e}");
                    0
                }
            })
            .sum()
    }

    /// Routes a bus event to the device that issued its transaction.
    ///
    /// Returns the owner when the event could be attributed.
    pub fn dispatch(&mut self, event: &BusEvent) -> Option<DeviceId> {
        let transaction = event.transaction_id();
        let Some(owner) = self.correlation.remove(&transaction) else {
            debug!("No owner for transaction {transaction}, event dropped");
            return None;
        };
        let Some(device) = self.lookup_mut(owner) else {
            debug!("Owner FFU #{owner} of transaction {transaction} is gone");
            return None;
        };

        if let BusEvent::TransactionLost { id } = event {
            device.on_transaction_lost(*id);
            return Some(owner);
        }

        device.acknowledge_outstanding(transaction, true);
        if device.on_response(event) {
            Some(owner)
        } else {
            debug!(
                "Transaction {transaction} answered from {:?}, not FFU #{owner}",
                event.origin()
            );
            None
        }
    }

    /// Number of transactions still waiting for a response.
    pub fn pending_transactions(&self) -> usize {
        self.correlation.len()
    }

    /// Saves every dirty device. Failures are logged.
    pub fn save_all(&mut self) -> usize {
        self.devices
            .iter_mut()
            .filter_map(|device| match device.save() {
                Ok(written) => written.then_some(()),
                Err(e) => {
                    warn!("FFU #{}: {e}", device.id());
                    None
                }
            })
            .count()
    }

    fn track(&mut self, owner: DeviceId, issued: impl IntoIterator<Item = TransactionId>) {
        for transaction in issued {
            if let Some(previous) = self.correlation.insert(transaction, owner) {
                warn!("Transaction {transaction} reissued while owned by FFU #{previous}");
            }
        }
    }
}
