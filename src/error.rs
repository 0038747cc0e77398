use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::decode::DecodeError;
use crate::hw::CapabilityKind;

/// Errors returned by the session manager and its capability wrappers.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("this platform has no Bluetooth Low Energy support")]
    CapabilityUnavailable,
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Errors raised while picking a peripheral.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("device selection was cancelled")]
    Cancelled,
    #[error("no compatible heart-rate device was found")]
    NoMatchingDevice,
    #[error("no compatible heart-rate device was found within {}", humantime::format_duration(*timeout))]
    ScanTimedOut { timeout: Duration },
    #[error("BLE discovery failed")]
    Ble(#[from] btleplug::Error),
}

/// Errors raised while establishing the GATT link.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("device `{device_id}` rejected the connection")]
    Rejected {
        device_id: String,
        #[source]
        source: btleplug::Error,
    },
    #[error("device `{device_id}` is unreachable")]
    Unreachable { device_id: String },
    #[error("failed to watch device `{device_id}` for link loss")]
    LinkWatch {
        device_id: String,
        #[source]
        source: btleplug::Error,
    },
}

/// Errors raised by requests against an open GATT link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("service {uuid} was not found on the connected device")]
    ServiceNotFound { uuid: Uuid },
    #[error("characteristic {uuid} was not found on the connected device")]
    CharacteristicNotFound { uuid: Uuid },
    #[error("the device is not connected")]
    NotConnected,
    #[error("the device rejected the {operation} request")]
    Rejected { operation: &'static str },
}

/// Failure to attach one optional capability during connect.
#[derive(Debug, Error)]
#[error("failed to attach the {capability} capability")]
pub struct AttachError {
    pub(crate) capability: CapabilityKind,
    #[source]
    pub(crate) source: TransportError,
}

impl AttachError {
    pub(crate) fn new(capability: CapabilityKind, source: TransportError) -> Self {
        Self { capability, source }
    }

    /// Returns the capability that failed to attach.
    #[must_use]
    pub fn capability(&self) -> CapabilityKind {
        self.capability
    }
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fake device records must have the form `device_id|name`")]
    InvalidDeviceRecord,
    #[error("fake device records cannot have an empty device id")]
    EmptyDeviceId,
    #[error("hex payload length must be even")]
    InvalidHexLength,
    #[error("hex payload contains invalid character `{value}`")]
    InvalidHexCharacter { value: String },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake device fixture while fake mode is enabled")]
    MissingFakeDevice,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
