//! On-disk record of one device: a single line of `key=value` tokens.

use std::fmt;

use crate::bus::BusId;

use super::DeviceId;

const FILE_PREFIX: &str = "ffu-";
const FILE_SUFFIX: &str = ".csv";

/// Persisted configuration of a [`Device`](super::Device).
///
/// ```text
/// id=42 bus=1 fanAddress=5 fanGroup=2 speedMaxRPM=1200.00 setpointSpeedRaw=128
/// ```
///
/// Unset bus, address and group are written as `-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub bus: Option<BusId>,
    pub fan_address: Option<u8>,
    pub fan_group: Option<u8>,
    pub speed_max_rpm: f64,
    pub setpoint_speed_raw: u8,
}

impl DeviceRecord {
    /// File name holding the record of device `id`.
    pub fn file_name(id: DeviceId) -> String {
        format!("{FILE_PREFIX}{id:06}{FILE_SUFFIX}")
    }

    pub fn is_record_file(name: &str) -> bool {
        name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)
    }

    /// Parses the first line of a record file.
    ///
    /// Tokens that are not `key=value` pairs and unknown keys are skipped.
    /// The `id` key is mandatory.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut id = None;
        let mut record = DeviceRecord {
            id: 0,
            bus: None,
            fan_address: None,
            fan_group: None,
            speed_max_rpm: 0.0,
            setpoint_speed_raw: 0,
        };

        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if value.contains('=') {
                continue;
            }

            match key {
                "id" => id = Some(parse_number::<DeviceId>(key, value)?),
                "bus" => record.bus = parse_optional(key, value)?,
                "fanAddress" => record.fan_address = parse_optional(key, value)?,
                "fanGroup" => record.fan_group = parse_optional(key, value)?,
                "speedMaxRPM" => record.speed_max_rpm = parse_number(key, value)?,
                "setpointSpeedRaw" => record.setpoint_speed_raw = parse_number(key, value)?,
                _ => {}
            }
        }

        record.id = id.ok_or_else(|| String::from("missing key 'id'"))?;
        Ok(record)
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "id={} bus={} fanAddress={} fanGroup={} speedMaxRPM={:.2} setpointSpeedRaw={}",
            self.id,
            unset_as_negative(self.bus),
            unset_as_negative(self.fan_address),
            unset_as_negative(self.fan_group),
            self.speed_max_rpm,
            self.setpoint_speed_raw,
        )
    }
}

fn unset_as_negative<T: Into<i64>>(value: Option<T>) -> i64 {
    value.map_or(-1, Into::into)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value '{value}' for key '{key}'"))
}

fn parse_optional<T: std::str::FromStr>(key: &str, value: &str) -> Result<Option<T>, String> {
    if value.trim().starts_with('-') {
        return Ok(None);
    }
    parse_number(key, value).map(Some)
}
