use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use super::model::PeripheralInfo;
use super::transport::{
    BleAdapter, BlePeripheral, CharacteristicHandle, DeviceRequest, GattTransport,
    LinkLossListener, LinkLossWatch, NotificationStream, ServiceHandle,
};
use crate::error::{ConnectionError, DiscoveryError, TransportError};
use crate::gatt::describe_uuid;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// BLE adapter backed by `btleplug`.
#[derive(Debug, Default)]
pub(crate) struct BtleplugAdapter {
    scan_timeout: Option<Duration>,
}

impl BtleplugAdapter {
    pub(crate) fn new(scan_timeout: Option<Duration>) -> Self {
        Self { scan_timeout }
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, btleplug::Error> {
        let manager = Manager::new().await?;
        manager.adapters().await
    }

    /// Scans every adapter until one reports a matching peripheral.
    #[instrument(skip(self, request), level = "debug")]
    async fn discover(&self, request: &DeviceRequest) -> Result<BtleplugPeripheral, DiscoveryError> {
        let adapters = self.adapters().await?;
        if adapters.is_empty() {
            return Err(DiscoveryError::NoMatchingDevice);
        }

        let filter = scan_filter_for(request);
        for adapter in &adapters {
            adapter.start_scan(filter.clone()).await?;
        }
        info!(adapter_count = adapters.len(), "scanning for heart-rate peripherals");

        let picked = race_scan(
            first_matching_peripheral(&adapters, request),
            self.scan_timeout,
        )
        .await;

        for adapter in &adapters {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }
        picked
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn is_available(&self) -> bool {
        match self.adapters().await {
            Ok(adapters) => !adapters.is_empty(),
            Err(error) => {
                debug!(?error, "BLE manager is unavailable");
                false
            }
        }
    }

    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> Result<Box<dyn BlePeripheral>, DiscoveryError> {
        let picked = self.discover(request).await?;
        Ok(Box::new(picked))
    }
}

/// Runs `search` until it settles, Ctrl+C arrives, or `scan_timeout` expires.
async fn race_scan<T, S>(search: S, scan_timeout: Option<Duration>) -> Result<T, DiscoveryError>
where
    S: Future<Output = Result<T, DiscoveryError>>,
{
    let deadline = async {
        match scan_timeout {
            Some(limit) => {
                sleep(limit).await;
                limit
            }
            None => pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => Err(DiscoveryError::Cancelled),
        limit = deadline => Err(DiscoveryError::ScanTimedOut { timeout: limit }),
        picked = search => picked,
    }
}

async fn first_matching_peripheral(
    adapters: &[Adapter],
    request: &DeviceRequest,
) -> Result<BtleplugPeripheral, DiscoveryError> {
    loop {
        for adapter in adapters {
            for peripheral in adapter.peripherals().await? {
                let properties = match peripheral.properties().await {
                    Ok(Some(properties)) => properties,
                    Ok(None) => continue,
                    Err(error) => {
                        debug!(id = %peripheral.id(), ?error, "skipping unreadable peripheral");
                        continue;
                    }
                };
                if !matches_request(&properties, request) {
                    trace!(id = %peripheral.id(), "skipping non-matching peripheral");
                    continue;
                }

                let info = PeripheralInfo::new(peripheral.id().to_string(), properties.local_name);
                return Ok(BtleplugPeripheral {
                    adapter: adapter.clone(),
                    peripheral,
                    info,
                });
            }
        }

        sleep(SCAN_POLL_INTERVAL).await;
    }
}

fn scan_filter_for(request: &DeviceRequest) -> ScanFilter {
    ScanFilter {
        services: request.filter_services().to_vec(),
    }
}

fn matches_request(properties: &PeripheralProperties, request: &DeviceRequest) -> bool {
    request.accepts_services(&properties.services)
        && request.accepts_name(properties.local_name.as_deref())
}

/// Disconnects a link this call opened when the step after connecting failed.
async fn release_opened_link<T, D, F>(
    outcome: Result<T, btleplug::Error>,
    opened_link: bool,
    disconnect: D,
) -> Result<T, btleplug::Error>
where
    D: FnOnce() -> F,
    F: Future<Output = Result<(), btleplug::Error>>,
{
    if outcome.is_err() && opened_link {
        if let Err(error) = disconnect().await {
            debug!(?error, "failed to release partially opened link");
        }
    }
    outcome
}

fn connection_error(device_id: &str, source: btleplug::Error) -> ConnectionError {
    match source {
        btleplug::Error::DeviceNotFound | btleplug::Error::TimedOut(_) => {
            ConnectionError::Unreachable {
                device_id: device_id.to_string(),
            }
        }
        source => ConnectionError::Rejected {
            device_id: device_id.to_string(),
            source,
        },
    }
}

#[derive(Debug)]
struct BtleplugPeripheral {
    adapter: Adapter,
    peripheral: Peripheral,
    info: PeripheralInfo,
}

#[async_trait]
impl BlePeripheral for BtleplugPeripheral {
    fn info(&self) -> PeripheralInfo {
        self.info.clone()
    }

    async fn watch_link_loss(
        &self,
        listener: LinkLossListener,
    ) -> Result<LinkLossWatch, ConnectionError> {
        let mut events =
            self.adapter
                .events()
                .await
                .map_err(|source| ConnectionError::LinkWatch {
                    device_id: self.info.device_id().to_string(),
                    source,
                })?;
        let watched = self.peripheral.id();
        let registration = CancellationToken::new();
        let cancelled = registration.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == watched => {
                            listener();
                            break;
                        }
                        Some(_other) => {}
                        None => break,
                    },
                }
            }
        });

        Ok(LinkLossWatch::new(registration))
    }

    #[instrument(skip(self), level = "debug", fields(device_id = self.info.device_id()))]
    async fn connect_gatt(&self) -> Result<Arc<dyn GattTransport>, ConnectionError> {
        let device_id = self.info.device_id();
        let connected = self
            .peripheral
            .is_connected()
            .await
            .map_err(|source| connection_error(device_id, source))?;
        let opened_link = !connected;
        if opened_link {
            self.peripheral
                .connect()
                .await
                .map_err(|source| connection_error(device_id, source))?;
        }
        let peripheral = &self.peripheral;
        let discovered = peripheral.discover_services().await;
        release_opened_link(discovered, opened_link, move || peripheral.disconnect())
            .await
            .map_err(|source| connection_error(device_id, source))?;
        info!("GATT link established");

        Ok(Arc::new(BtleplugTransport {
            peripheral: self.peripheral.clone(),
        }))
    }
}

#[derive(Debug)]
struct BtleplugTransport {
    peripheral: Peripheral,
}

impl BtleplugTransport {
    fn characteristic_for(
        &self,
        handle: CharacteristicHandle,
    ) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| {
                characteristic.uuid == handle.uuid()
                    && characteristic.service_uuid == handle.service_uuid()
            })
            .ok_or(TransportError::CharacteristicNotFound {
                uuid: handle.uuid(),
            })
    }
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.peripheral.is_connected().await?)
    }

    #[instrument(skip(self), level = "trace")]
    async fn primary_service(&self, uuid: Uuid) -> Result<ServiceHandle, TransportError> {
        self.peripheral
            .services()
            .iter()
            .find(|service| service.primary && service.uuid == uuid)
            .map(|service| ServiceHandle::new(service.uuid))
            .ok_or(TransportError::ServiceNotFound { uuid })
    }

    #[instrument(skip(self), level = "trace")]
    async fn characteristic(
        &self,
        service: ServiceHandle,
        uuid: Uuid,
    ) -> Result<CharacteristicHandle, TransportError> {
        let found = self
            .peripheral
            .services()
            .iter()
            .filter(|candidate| candidate.uuid == service.uuid())
            .flat_map(|candidate| candidate.characteristics.iter())
            .any(|characteristic| characteristic.uuid == uuid);
        if found {
            Ok(CharacteristicHandle::new(service, uuid))
        } else {
            Err(TransportError::CharacteristicNotFound { uuid })
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic_for(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    #[instrument(skip(self), level = "trace")]
    async fn subscribe(
        &self,
        characteristic: CharacteristicHandle,
    ) -> Result<NotificationStream, TransportError> {
        let characteristic = self.characteristic_for(characteristic)?;
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&characteristic).await?;

        let expected = characteristic.uuid;
        debug!(characteristic = %describe_uuid(expected), "notifications started");
        Ok(Box::pin(
            notifications
                .filter(move |notification| notification.uuid == expected)
                .map(|notification| notification.value),
        ))
    }

    #[instrument(skip(self), level = "trace")]
    async fn unsubscribe(
        &self,
        characteristic: CharacteristicHandle,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic_for(characteristic)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use btleplug::api::bleuuid::uuid_from_u16;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::gatt::GattEndpoint;

    fn heart_rate_request(prefix: Option<&str>) -> DeviceRequest {
        DeviceRequest::builder()
            .filter_services(vec![GattEndpoint::HeartRateService.uuid()])
            .optional_services(vec![GattEndpoint::BatteryService.uuid()])
            .maybe_name_prefix(prefix.map(String::from))
            .build()
    }

    fn properties(name: Option<&str>, services: &[u16]) -> PeripheralProperties {
        PeripheralProperties {
            local_name: name.map(String::from),
            services: services.iter().copied().map(uuid_from_u16).collect(),
            ..PeripheralProperties::default()
        }
    }

    #[test]
    fn scan_filter_uses_filter_services_only() {
        let filter = scan_filter_for(&heart_rate_request(None));
        assert_eq!(vec![GattEndpoint::HeartRateService.uuid()], filter.services);
    }

    #[rstest]
    #[case(properties(Some("Polar H10"), &[0x180D, 0x180F]), None, true)]
    #[case(properties(None, &[0x180D]), None, true)]
    #[case(properties(Some("Polar H10"), &[0x180F]), None, false)]
    #[case(properties(Some("Polar H10"), &[0x180D]), Some("Polar"), true)]
    #[case(properties(Some("TICKR"), &[0x180D]), Some("Polar"), false)]
    fn matches_request_checks_services_and_name(
        #[case] properties: PeripheralProperties,
        #[case] prefix: Option<&str>,
        #[case] expected: bool,
    ) {
        assert_eq!(
            expected,
            matches_request(&properties, &heart_rate_request(prefix))
        );
    }

    #[test]
    fn unreachable_errors_are_distinguished_from_rejections() {
        assert_matches!(
            connection_error("AA:BB", btleplug::Error::DeviceNotFound),
            ConnectionError::Unreachable { device_id } if device_id == "AA:BB"
        );
        assert_matches!(
            connection_error("AA:BB", btleplug::Error::TimedOut(Duration::from_secs(5))),
            ConnectionError::Unreachable { .. }
        );
        assert_matches!(
            connection_error("AA:BB", btleplug::Error::PermissionDenied),
            ConnectionError::Rejected { .. }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scan_timeout_ends_an_unfinished_search() {
        let limit = Duration::from_secs(30);
        let result = race_scan(pending::<Result<(), DiscoveryError>>(), Some(limit)).await;

        assert_matches!(result, Err(DiscoveryError::ScanTimedOut { timeout }) if timeout == limit);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_search_wins_before_the_deadline() {
        let result = race_scan(async { Ok(7) }, Some(Duration::from_secs(30))).await;

        assert_matches!(result, Ok(7));
    }

    #[rstest]
    #[case::discovery_failed_after_connect(Err(btleplug::Error::DeviceNotFound), true, 1)]
    #[case::link_was_already_up(Err(btleplug::Error::DeviceNotFound), false, 0)]
    #[case::discovery_succeeded(Ok(()), true, 0)]
    #[tokio::test]
    async fn failed_discovery_releases_only_links_it_opened(
        #[case] outcome: Result<(), btleplug::Error>,
        #[case] opened_link: bool,
        #[case] expected_disconnects: usize,
    ) {
        let disconnects = AtomicUsize::new(0);
        let counter = &disconnects;
        let expected_ok = outcome.is_ok();

        let result = release_opened_link(outcome, opened_link, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(expected_ok, result.is_ok());
        assert_eq!(expected_disconnects, disconnects.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_release_keeps_the_original_error() {
        let result = release_opened_link::<(), _, _>(
            Err(btleplug::Error::DeviceNotFound),
            true,
            || async { Err(btleplug::Error::NotConnected) },
        )
        .await;

        assert_matches!(result, Err(btleplug::Error::DeviceNotFound));
    }
}
