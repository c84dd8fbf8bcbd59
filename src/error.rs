//! Error taxonomy for the device and protocol layers.
//!
//! None of these errors is fatal to the daemon: each one is scoped to a
//! single request, a single transaction or a single connection.

use std::path::PathBuf;

use thiserror::Error;

use crate::bus::{BusId, TransactionId};
use crate::device::DeviceId;

/// Errors raised by devices, the registry and the command parser.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A `--key=value` token did not split into exactly two parts.
    #[error("malformed key/value token '{0}'")]
    ProtocolSyntax(String),

    /// A command was issued without one of its required keys.
    #[error("parameter \"{0}\" not specified")]
    MissingParameter(String),

    /// The registry already holds a device with this identifier.
    #[error("FFU #{0} already exists")]
    DuplicateId(DeviceId),

    /// No device with this identifier is registered.
    #[error("FFU #{0} not found")]
    UnknownDevice(DeviceId),

    /// The referenced bus identifier does not resolve to a transport.
    #[error("bus {0} not found")]
    BusNotFound(BusId),

    /// The bus declared a transaction lost.
    #[error("transaction {0} lost")]
    TransactionLost(TransactionId),

    /// A property value could not be parsed for its type.
    #[error("invalid value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },

    /// The property exists but cannot be written.
    #[error("key {0} is read-only")]
    ReadOnly(&'static str),

    /// The device calibration does not allow the requested operation.
    #[error("invalid configuration for FFU #{id}: {reason}")]
    InvalidConfiguration { id: DeviceId, reason: String },

    /// Reading or writing a persisted record failed.
    #[error("persistence failure on {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record could not be interpreted.
    #[error("malformed record {path}: {reason}")]
    RecordFormat { path: PathBuf, reason: String },
}

pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_parameter_renders_key_in_quotes() {
        let err = ControlError::MissingParameter("bus".into());
        assert_eq!(err.to_string(), "parameter \"bus\" not specified");
    }

    #[test]
    fn persistence_error_keeps_io_source() {
        let err = ControlError::Persistence {
            path: PathBuf::from("/tmp/ffu-000001.csv"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("ffu-000001.csv"));
    }
}
