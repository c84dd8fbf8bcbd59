//! Named device properties exposed over the remote protocol.

use std::{fmt, str::FromStr};

use crate::{
    bus::TransactionId,
    error::{ControlError, ControlResult},
};

use super::Device;

/// A device property addressable by its protocol name.
///
/// The declaration order is the order in which [`Property::ALL`] applies
/// writes: addressing and calibration come before setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Id,
    BusId,
    FanAddress,
    FanGroup,
    MaxRpm,
    RawSpeed,
    Rpm,
    Actual,
}

impl Property {
    pub const ALL: [Property; 8] = [
        Property::Id,
        Property::BusId,
        Property::FanAddress,
        Property::FanGroup,
        Property::MaxRpm,
        Property::RawSpeed,
        Property::Rpm,
        Property::Actual,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Property::Id => "id",
            Property::BusId => "busID",
            Property::FanAddress => "fanAddress",
            Property::FanGroup => "fanGroup",
            Property::MaxRpm => "maxRPM",
            Property::RawSpeed => "rawspeed",
            Property::Rpm => "rpm",
            Property::Actual => "actual",
        }
    }

    pub const fn is_writable(self) -> bool {
        !matches!(self, Property::Id | Property::Actual)
    }

    /// Reads the property from `device` in its protocol representation.
    pub fn read(self, device: &Device) -> String {
        let unset = |value: Option<i64>| value.unwrap_or(-1).to_string();
        match self {
            Property::Id => device.id().to_string(),
            Property::BusId => unset(device.bus_id().map(i64::from)),
            Property::FanAddress => unset(device.fan_address().map(i64::from)),
            Property::FanGroup => unset(device.fan_group().map(i64::from)),
            Property::MaxRpm => format!("{:.2}", device.speed_max_rpm()),
            Property::RawSpeed => device.setpoint_raw().to_string(),
            Property::Rpm => device.speed_setpoint_rpm().to_string(),
            Property::Actual => device.actual_data().render(),
        }
    }

    /// Parses `value` and applies it to `device`.
    ///
    /// Returns the identifier of a bus write triggered by a setpoint change.
    pub fn write(self, device: &mut Device, value: &str) -> ControlResult<Option<TransactionId>> {
        let invalid = || ControlError::InvalidValue {
            key: self.name().to_string(),
            value: value.to_string(),
        };
        let optional = |value: &str| -> ControlResult<Option<i64>> {
            let parsed: i64 = value.trim().parse().map_err(|_| invalid())?;
            Ok((parsed >= 0).then_some(parsed))
        };

        match self {
            Property::Id | Property::Actual => Err(ControlError::ReadOnly(self.name())),
            Property::BusId => {
                let bus = optional(value)?
                    .map(u32::try_from)
                    .transpose()
                    .map_err(|_| invalid())?;
                device.set_bus_id(bus);
                Ok(None)
            }
            Property::FanAddress => {
                let address = optional(value)?
                    .map(u8::try_from)
                    .transpose()
                    .map_err(|_| invalid())?;
                device.set_fan_address(address);
                Ok(None)
            }
            Property::FanGroup => {
                let group = optional(value)?
                    .map(u8::try_from)
                    .transpose()
                    .map_err(|_| invalid())?;
                device.set_fan_group(group);
                Ok(None)
            }
            Property::MaxRpm => {
                let max_rpm: f64 = value.trim().parse().map_err(|_| invalid())?;
                if !max_rpm.is_finite() || max_rpm < 0.0 {
                    return Err(invalid());
                }
                device.set_max_rpm(max_rpm);
                Ok(None)
            }
            Property::RawSpeed => {
                let raw: u8 = value.trim().parse().map_err(|_| invalid())?;
                device.set_setpoint_raw(raw)
            }
            Property::Rpm => {
                let rpm: f64 = value.trim().parse().map_err(|_| invalid())?;
                if !rpm.is_finite() || rpm < 0.0 {
                    return Err(invalid());
                }
                device.set_setpoint(rpm)
            }
        }
    }
}

impl FromStr for Property {
    type Err = ControlError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Property::ALL
            .into_iter()
            .find(|property| property.name() == name)
            .ok_or_else(|| ControlError::InvalidValue {
                key: String::from("property"),
                value: name.to_string(),
            })
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
