mod btleplug_backend;
mod capability;
mod fake_backend;
mod model;
mod session;
mod transport;

use std::time::Duration;

pub use self::capability::{BatteryCapability, CapabilityKind, HeartRateCapability};
#[cfg(test)]
pub(crate) use self::fake_backend::{FakeAdapter, FakeController};
pub(crate) use self::fake_backend::{
    FakeBackendConfig, FakeDevice, FakeFaults, HexPayload, NotificationPayloads,
};
pub use self::model::{
    BatteryLevel, HeartRateSample, MonitorStopReason, MonitorSummary, PeripheralInfo,
    UNKNOWN_DEVICE_NAME,
};
pub use self::session::{
    SessionCallbacks, SessionHandle, SessionManager, SessionServices,
};
pub use self::transport::{
    BleAdapter, BlePeripheral, CharacteristicHandle, DeviceRequest, GattTransport,
    LinkLossListener, LinkLossWatch, NotificationStream, ServiceHandle,
};

/// Builds the BLE adapter backed by the host's radio.
pub(crate) fn real_ble_adapter(scan_timeout: Option<Duration>) -> Box<dyn BleAdapter> {
    Box::new(btleplug_backend::BtleplugAdapter::new(scan_timeout))
}

/// Builds a simulated BLE adapter from fixtures.
pub(crate) fn fake_ble_adapter(config: FakeBackendConfig) -> Box<dyn BleAdapter> {
    Box::new(fake_backend::FakeAdapter::new(config))
}
