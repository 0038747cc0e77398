use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use hex::FromHexError;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::model::PeripheralInfo;
use super::transport::{
    BleAdapter, BlePeripheral, CharacteristicHandle, DeviceRequest, GattTransport,
    LinkLossListener, LinkLossWatch, NotificationStream, ServiceHandle,
};
use crate::error::{ConnectionError, DiscoveryError, FixtureError, TransportError};
use crate::gatt::{GattEndpoint, describe_uuid};

const DEFAULT_BATTERY_PAYLOAD: [u8; 1] = [0x57];
const DEFAULT_NOTIFICATIONS: [[u8; 2]; 3] = [[0x00, 72], [0x00, 75], [0x00, 74]];

/// Parsed fake peripheral record in the form `device_id|name`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct FakeDevice {
    device_id: String,
    name: Option<String>,
}

impl FromStr for FakeDevice {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = value.split('|').map(str::trim).collect();
        let [device_id, name] = fields.as_slice() else {
            return Err(FixtureError::InvalidDeviceRecord);
        };
        if device_id.is_empty() {
            return Err(FixtureError::EmptyDeviceId);
        }

        let name = match *name {
            "" | "-" => None,
            name => Some(name.to_string()),
        };
        Ok(Self {
            device_id: (*device_id).to_string(),
            name,
        })
    }
}

/// Parsed fake hex payload.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct HexPayload {
    payload: Vec<u8>,
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payload = parse_hex(value)?;
        Ok(Self { payload })
    }
}

/// Parsed fake notification payload fixtures.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// Platform failures the fake backend can simulate.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Builder)]
pub(crate) struct FakeFaults {
    #[builder(default)]
    pub(crate) cancel_discovery: bool,
    #[builder(default)]
    pub(crate) reject_connect: bool,
    #[builder(default)]
    pub(crate) reject_subscribe: bool,
    #[builder(default)]
    pub(crate) reject_unsubscribe: bool,
    #[builder(default)]
    pub(crate) reject_read: bool,
}

/// Settings for constructing a fake BLE adapter.
#[derive(Debug, Builder)]
pub(crate) struct FakeBackendConfig {
    device: Option<FakeDevice>,
    #[builder(default = true)]
    available: bool,
    #[builder(default = true)]
    heart_rate_service: bool,
    #[builder(default = true)]
    battery_service: bool,
    notifications: Option<NotificationPayloads>,
    battery_payload: Option<HexPayload>,
    #[builder(default)]
    faults: FakeFaults,
    #[builder(default)]
    discovery_delay: Duration,
}

#[derive(Debug)]
struct FakeSettings {
    device: Option<FakeDevice>,
    available: bool,
    heart_rate_service: bool,
    battery_service: bool,
    notifications: Vec<Vec<u8>>,
    battery_payload: Vec<u8>,
    faults: FakeFaults,
    discovery_delay: Duration,
}

impl From<FakeBackendConfig> for FakeSettings {
    fn from(config: FakeBackendConfig) -> Self {
        Self {
            device: config.device,
            available: config.available,
            heart_rate_service: config.heart_rate_service,
            battery_service: config.battery_service,
            notifications: config.notifications.map_or_else(
                || DEFAULT_NOTIFICATIONS.map(Vec::from).to_vec(),
                Into::into,
            ),
            battery_payload: config
                .battery_payload
                .map_or_else(|| DEFAULT_BATTERY_PAYLOAD.to_vec(), Into::into),
            faults: config.faults,
            discovery_delay: config.discovery_delay,
        }
    }
}

#[derive(Default)]
struct FakeLinkState {
    connected: bool,
    link_loss_listeners: Vec<(CancellationToken, LinkLossListener)>,
    notification_senders: HashMap<Uuid, UnboundedSender<Vec<u8>>>,
    unsubscribe_requests: usize,
    read_requests: usize,
}

#[derive(Default)]
struct FakeShared {
    link: Mutex<FakeLinkState>,
}

impl fmt::Debug for FakeShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeShared").finish_non_exhaustive()
    }
}

impl FakeShared {
    fn link(&self) -> MutexGuard<'_, FakeLinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_link_loss(&self) {
        let listeners: Vec<LinkLossListener> = {
            let mut link = self.link();
            link.connected = false;
            link.notification_senders.clear();
            link.link_loss_listeners
                .retain(|(registration, _listener)| !registration.is_cancelled());
            link.link_loss_listeners
                .iter()
                .map(|(_registration, listener)| Arc::clone(listener))
                .collect()
        };

        for listener in listeners {
            listener();
        }
    }
}

/// Fake BLE adapter used in tests and non-hardware environments.
#[derive(Debug)]
pub(crate) struct FakeAdapter {
    settings: Arc<FakeSettings>,
    shared: Arc<FakeShared>,
}

impl FakeAdapter {
    /// Creates a fake adapter from explicit settings.
    pub(crate) fn new(config: FakeBackendConfig) -> Self {
        Self {
            settings: Arc::new(config.into()),
            shared: Arc::new(FakeShared::default()),
        }
    }

    /// Returns a handle for driving and observing the simulated link.
    #[cfg(test)]
    pub(crate) fn controller(&self) -> FakeController {
        FakeController {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    async fn is_available(&self) -> bool {
        self.settings.available
    }

    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> Result<Box<dyn BlePeripheral>, DiscoveryError> {
        if !self.settings.discovery_delay.is_zero() {
            sleep(self.settings.discovery_delay).await;
        }
        if self.settings.faults.cancel_discovery {
            return Err(DiscoveryError::Cancelled);
        }

        let Some(device) = self.settings.device.as_ref() else {
            return Err(DiscoveryError::NoMatchingDevice);
        };
        if !request.accepts_name(device.name.as_deref())
            || !request.accepts_services(&self.settings.advertised_services())
        {
            return Err(DiscoveryError::NoMatchingDevice);
        }

        info!(device_id = %device.device_id, "picked fake peripheral");
        Ok(Box::new(FakePeripheral {
            info: PeripheralInfo::new(device.device_id.clone(), device.name.clone()),
            settings: Arc::clone(&self.settings),
            shared: Arc::clone(&self.shared),
        }))
    }
}

impl FakeSettings {
    fn advertised_services(&self) -> Vec<Uuid> {
        let mut services = Vec::with_capacity(2);
        if self.heart_rate_service {
            services.push(GattEndpoint::HeartRateService.uuid());
        }
        if self.battery_service {
            services.push(GattEndpoint::BatteryService.uuid());
        }
        services
    }

    fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        let heart_rate = service == GattEndpoint::HeartRateService.uuid()
            && characteristic == GattEndpoint::HeartRateMeasurement.uuid();
        let battery = service == GattEndpoint::BatteryService.uuid()
            && characteristic == GattEndpoint::BatteryLevel.uuid();
        heart_rate || battery
    }
}

#[derive(Debug)]
struct FakePeripheral {
    info: PeripheralInfo,
    settings: Arc<FakeSettings>,
    shared: Arc<FakeShared>,
}

#[async_trait]
impl BlePeripheral for FakePeripheral {
    fn info(&self) -> PeripheralInfo {
        self.info.clone()
    }

    async fn watch_link_loss(
        &self,
        listener: LinkLossListener,
    ) -> Result<LinkLossWatch, ConnectionError> {
        let registration = CancellationToken::new();
        self.shared
            .link()
            .link_loss_listeners
            .push((registration.clone(), listener));
        Ok(LinkLossWatch::new(registration))
    }

    async fn connect_gatt(&self) -> Result<Arc<dyn GattTransport>, ConnectionError> {
        if self.settings.faults.reject_connect {
            return Err(ConnectionError::Unreachable {
                device_id: self.info.device_id().to_string(),
            });
        }

        self.shared.link().connected = true;
        Ok(Arc::new(FakeTransport {
            settings: Arc::clone(&self.settings),
            shared: Arc::clone(&self.shared),
        }))
    }
}

#[derive(Debug)]
struct FakeTransport {
    settings: Arc<FakeSettings>,
    shared: Arc<FakeShared>,
}

impl FakeTransport {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.shared.link().connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl GattTransport for FakeTransport {
    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.shared.link().connected)
    }

    async fn primary_service(&self, uuid: Uuid) -> Result<ServiceHandle, TransportError> {
        self.ensure_connected()?;
        if self.settings.advertised_services().contains(&uuid) {
            Ok(ServiceHandle::new(uuid))
        } else {
            Err(TransportError::ServiceNotFound { uuid })
        }
    }

    async fn characteristic(
        &self,
        service: ServiceHandle,
        uuid: Uuid,
    ) -> Result<CharacteristicHandle, TransportError> {
        self.ensure_connected()?;
        if self.settings.has_characteristic(service.uuid(), uuid) {
            Ok(CharacteristicHandle::new(service, uuid))
        } else {
            Err(TransportError::CharacteristicNotFound { uuid })
        }
    }

    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        self.shared.link().read_requests += 1;
        if self.settings.faults.reject_read {
            return Err(TransportError::Rejected { operation: "read" });
        }
        if characteristic.uuid() == GattEndpoint::BatteryLevel.uuid() {
            Ok(self.settings.battery_payload.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn subscribe(
        &self,
        characteristic: CharacteristicHandle,
    ) -> Result<NotificationStream, TransportError> {
        self.ensure_connected()?;
        if self.settings.faults.reject_subscribe {
            return Err(TransportError::Rejected {
                operation: "subscribe",
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        if characteristic.uuid() == GattEndpoint::HeartRateMeasurement.uuid() {
            for payload in &self.settings.notifications {
                // The receiver is alive until this function returns.
                let _ = sender.send(payload.clone());
            }
        }
        self.shared
            .link()
            .notification_senders
            .insert(characteristic.uuid(), sender);
        debug!(
            characteristic = %describe_uuid(characteristic.uuid()),
            "fake notifications started"
        );
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn unsubscribe(
        &self,
        characteristic: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let mut link = self.shared.link();
        link.unsubscribe_requests += 1;
        link.notification_senders.remove(&characteristic.uuid());
        if self.settings.faults.reject_unsubscribe {
            return Err(TransportError::Rejected {
                operation: "unsubscribe",
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.emit_link_loss();
        Ok(())
    }
}

/// Drives and observes the fake link from tests.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct FakeController {
    shared: Arc<FakeShared>,
}

#[cfg(test)]
impl FakeController {
    /// Pushes one heart-rate payload if notifications are active.
    pub(crate) fn emit_heart_rate(&self, payload: &[u8]) -> bool {
        self.shared
            .link()
            .notification_senders
            .get(&GattEndpoint::HeartRateMeasurement.uuid())
            .is_some_and(|sender| sender.send(payload.to_vec()).is_ok())
    }

    /// Simulates the peer dropping the link.
    pub(crate) fn emit_link_loss(&self) {
        self.shared.emit_link_loss();
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.shared.link().connected
    }

    pub(crate) fn active_link_loss_listeners(&self) -> usize {
        self.shared
            .link()
            .link_loss_listeners
            .iter()
            .filter(|(registration, _listener)| !registration.is_cancelled())
            .count()
    }

    pub(crate) fn unsubscribe_requests(&self) -> usize {
        self.shared.link().unsubscribe_requests
    }

    pub(crate) fn read_requests(&self) -> usize {
        self.shared.link().read_requests
    }
}

fn parse_notifications(raw_value: &str) -> Result<Vec<Vec<u8>>, FixtureError> {
    if raw_value.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw_value.split(',').map(parse_hex).collect()
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.split_whitespace().collect();
    hex::decode(cleaned).map_err(|error| match error {
        FromHexError::OddLength | FromHexError::InvalidStringLength => {
            FixtureError::InvalidHexLength
        }
        FromHexError::InvalidHexCharacter { c, .. } => FixtureError::InvalidHexCharacter {
            value: c.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("AA:BB|Polar H10", "AA:BB", Some("Polar H10"))]
    #[case("AA:BB|-", "AA:BB", None)]
    #[case(" AA:BB | ", "AA:BB", None)]
    fn fake_device_parses_records(
        #[case] record: &str,
        #[case] expected_id: &str,
        #[case] expected_name: Option<&str>,
    ) {
        let device: FakeDevice = record.parse().expect("record should parse");
        assert_eq!(expected_id, device.device_id);
        assert_eq!(expected_name, device.name.as_deref());
    }

    #[rstest]
    #[case("AA:BB")]
    #[case("AA:BB|name|extra")]
    fn fake_device_rejects_wrong_field_count(#[case] record: &str) {
        assert_matches!(
            record.parse::<FakeDevice>(),
            Err(FixtureError::InvalidDeviceRecord)
        );
    }

    #[test]
    fn fake_device_rejects_empty_id() {
        assert_matches!(
            "|Polar".parse::<FakeDevice>(),
            Err(FixtureError::EmptyDeviceId)
        );
    }

    #[test]
    fn parse_notifications_splits_payloads() {
        let payloads = parse_notifications("0048, 01 2C 01").expect("payloads should parse");
        assert_eq!(vec![vec![0x00, 0x48], vec![0x01, 0x2C, 0x01]], payloads);
    }

    #[test]
    fn parse_hex_rejects_odd_length() {
        assert_matches!(parse_hex("A"), Err(FixtureError::InvalidHexLength));
    }

    #[test]
    fn parse_hex_rejects_invalid_digit() {
        assert_matches!(
            parse_hex("ZZ"),
            Err(FixtureError::InvalidHexCharacter { value }) if value == "Z"
        );
    }

    #[tokio::test]
    async fn discovery_filters_on_advertised_heart_rate_service() {
        let adapter = FakeAdapter::new(
            FakeBackendConfig::builder()
                .device("AA:BB|Battery Only".parse().expect("record should parse"))
                .heart_rate_service(false)
                .build(),
        );
        let request = DeviceRequest::builder()
            .filter_services(vec![GattEndpoint::HeartRateService.uuid()])
            .build();

        let result = adapter.request_device(&request).await;
        assert_matches!(result, Err(DiscoveryError::NoMatchingDevice));
    }
}
