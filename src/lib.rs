//! Connects to Bluetooth Low Energy fitness bands, streams heart-rate
//! measurements, and reads battery level on demand.

mod app;
mod cli;
mod decode;
mod error;
mod gatt;
mod hw;
mod telemetry;
mod terminal;

pub use app::{RunOptions, fake_ble_adapter, real_ble_adapter, run, run_with_clients};
pub use cli::{Args, Command, DiscoveryArgs, FakeArgs, LogLevel, MonitorArgs, OutputFormat};
pub use decode::{DecodeError, FrameDecoder};
pub use error::{
    AttachError, ConnectionError, DiscoveryError, FixtureError, SessionError, TransportError,
};
pub use gatt::GattEndpoint;
pub use hw::{
    BatteryCapability, BatteryLevel, BleAdapter, BlePeripheral, CapabilityKind,
    CharacteristicHandle, DeviceRequest, GattTransport, HeartRateCapability, HeartRateSample,
    LinkLossListener, LinkLossWatch, MonitorStopReason, MonitorSummary, NotificationStream,
    PeripheralInfo, ServiceHandle, SessionCallbacks, SessionHandle,
    SessionManager, SessionServices, UNKNOWN_DEVICE_NAME,
};
pub use terminal::TerminalClient;
