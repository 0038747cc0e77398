use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::capability::{BatteryCapability, CapabilityKind, HeartRateCapability};
use super::model::{HeartRateSample, PeripheralInfo};
use super::transport::{BleAdapter, DeviceRequest, GattTransport, LinkLossWatch};
use crate::error::{AttachError, SessionError, TransportError};
use crate::gatt::GattEndpoint;

type DisconnectCallback = Box<dyn FnOnce() + Send>;
type HeartRateCallback = Box<dyn FnMut(HeartRateSample) + Send>;

/// Callbacks a caller registers for the lifetime of one session.
pub struct SessionCallbacks {
    on_disconnect: DisconnectCallback,
    on_heart_rate_changed: HeartRateCallback,
}

impl SessionCallbacks {
    /// Creates session callbacks.
    ///
    /// `on_disconnect` fires at most once, when the link actually drops.
    /// `on_heart_rate_changed` fires for every decoded sample while
    /// notifications are active.
    pub fn new<D, H>(on_disconnect: D, on_heart_rate_changed: H) -> Self
    where
        D: FnOnce() + Send + 'static,
        H: FnMut(HeartRateSample) + Send + 'static,
    {
        Self {
            on_disconnect: Box::new(on_disconnect),
            on_heart_rate_changed: Box::new(on_heart_rate_changed),
        }
    }
}

/// Fires the caller's disconnect callback on the first link-loss event only.
struct DisconnectOnce {
    callback: Mutex<Option<DisconnectCallback>>,
}

impl DisconnectOnce {
    fn new(callback: DisconnectCallback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
        }
    }

    fn fire(&self) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                info!("peripheral link lost");
                callback();
            }
            None => debug!("ignoring repeated link-loss event"),
        }
    }
}

/// Capabilities attached to a session. Either may be absent.
#[derive(Debug, Default)]
pub struct SessionServices {
    heart_rate: Option<HeartRateCapability>,
    battery: Option<BatteryCapability>,
}

impl SessionServices {
    #[must_use]
    pub fn heart_rate(&self) -> Option<&HeartRateCapability> {
        self.heart_rate.as_ref()
    }

    #[must_use]
    pub fn battery(&self) -> Option<&BatteryCapability> {
        self.battery.as_ref()
    }

    /// Returns the kinds of the attached capabilities.
    #[must_use]
    pub fn attached(&self) -> Vec<CapabilityKind> {
        let mut attached = Vec::with_capacity(2);
        if self.heart_rate.is_some() {
            attached.push(CapabilityKind::HeartRate);
        }
        if self.battery.is_some() {
            attached.push(CapabilityKind::Battery);
        }
        attached
    }
}

/// A connected peripheral and its attached capabilities.
///
/// Release it with [`SessionManager::disconnect`].
#[derive(Debug)]
pub struct SessionHandle {
    peripheral: PeripheralInfo,
    transport: Arc<dyn GattTransport>,
    services: SessionServices,
    link_watch: LinkLossWatch,
}

impl SessionHandle {
    /// Returns the peripheral name, or `Unknown Device` when it reported none.
    #[must_use]
    pub fn name(&self) -> &str {
        self.peripheral.display_name()
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        self.peripheral.device_id()
    }

    #[must_use]
    pub fn peripheral(&self) -> &PeripheralInfo {
        &self.peripheral
    }

    #[must_use]
    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Returns whether the transport still reports the link as up.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot report the link state.
    pub async fn is_connected(&self) -> Result<bool, TransportError> {
        self.transport.is_connected().await
    }
}

/// Drives discovery, connection, capability attachment and teardown.
pub struct SessionManager {
    adapter: Box<dyn BleAdapter>,
    name_prefix: Option<String>,
}

impl SessionManager {
    /// Creates a session manager over an injected BLE adapter.
    #[must_use]
    pub fn new(adapter: Box<dyn BleAdapter>) -> Self {
        Self {
            adapter,
            name_prefix: None,
        }
    }

    /// Narrows discovery to peripherals whose name starts with `name_prefix`.
    #[must_use]
    pub fn with_name_prefix(mut self, name_prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(name_prefix.into());
        self
    }

    /// Returns whether the platform has BLE support. Check this before
    /// [`SessionManager::connect`].
    pub async fn is_available(&self) -> bool {
        self.adapter.is_available().await
    }

    fn device_request(&self) -> DeviceRequest {
        DeviceRequest::builder()
            .filter_services(vec![GattEndpoint::HeartRateService.uuid()])
            .optional_services(vec![GattEndpoint::BatteryService.uuid()])
            .maybe_name_prefix(self.name_prefix.clone())
            .build()
    }

    /// Picks a heart-rate peripheral, connects, and attaches its capabilities.
    ///
    /// The heart-rate and battery capabilities are attached best-effort: a
    /// failure on either is logged and the handle omits that capability.
    ///
    /// # Errors
    ///
    /// Returns a discovery error if no peripheral was picked, or a connection
    /// error if the GATT link could not be established.
    #[instrument(skip(self, callbacks), level = "info", fields(name_prefix = ?self.name_prefix))]
    pub async fn connect(&self, callbacks: SessionCallbacks) -> Result<SessionHandle, SessionError> {
        let SessionCallbacks {
            on_disconnect,
            on_heart_rate_changed,
        } = callbacks;
        let span = tracing::Span::current();

        span.pb_set_message("Scanning for heart-rate monitors");
        let peripheral = self.adapter.request_device(&self.device_request()).await?;
        let info = peripheral.info();
        info!(device_id = info.device_id(), name = ?info.name(), "picked peripheral");

        let on_disconnect = Arc::new(DisconnectOnce::new(on_disconnect));
        let link_watch = peripheral
            .watch_link_loss(Arc::new(move || on_disconnect.fire()))
            .await?;

        span.pb_set_message(&format!("Connecting to {}", info.display_name()));
        let transport = peripheral.connect_gatt().await?;

        let heart_rate = optional(attach_heart_rate(&transport, on_heart_rate_changed).await);
        let battery = optional(attach_battery(&transport).await);

        let handle = SessionHandle {
            peripheral: info,
            transport,
            services: SessionServices {
                heart_rate,
                battery,
            },
            link_watch,
        };
        info!(
            name = handle.name(),
            capabilities = ?handle.services.attached(),
            "session established"
        );
        Ok(handle)
    }

    /// Stops notifications and releases the GATT link.
    ///
    /// This does not invoke the disconnect callback itself; that callback
    /// fires when the platform reports the link drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform disconnect request fails. Failures to
    /// stop heart-rate notifications are logged and never returned.
    #[instrument(skip(self, handle), level = "debug", fields(device_id = handle.device_id()))]
    pub async fn disconnect(&self, handle: SessionHandle) -> Result<(), TransportError> {
        let released = self.release(&handle).await;
        handle.link_watch.detach();
        released
    }

    pub(crate) async fn release(&self, handle: &SessionHandle) -> Result<(), TransportError> {
        if let Some(heart_rate) = handle.services.heart_rate()
            && let Err(error) = heart_rate.stop_notifications().await
        {
            warn!(%error, "failed to stop heart-rate notifications; continuing teardown");
        }

        if handle.transport.is_connected().await? {
            handle.transport.disconnect().await?;
        }
        Ok(())
    }
}

fn optional<T>(attached: Result<T, AttachError>) -> Option<T> {
    match attached {
        Ok(capability) => Some(capability),
        Err(error) => {
            warn!(
                capability = %error.capability(),
                cause = %error.source,
                "continuing without optional capability"
            );
            None
        }
    }
}

#[instrument(skip_all, level = "debug")]
async fn attach_heart_rate(
    transport: &Arc<dyn GattTransport>,
    on_sample: HeartRateCallback,
) -> Result<HeartRateCapability, AttachError> {
    let attached = async {
        let service = transport
            .primary_service(GattEndpoint::HeartRateService.uuid())
            .await?;
        let characteristic = transport
            .characteristic(service, GattEndpoint::HeartRateMeasurement.uuid())
            .await?;
        let capability = HeartRateCapability::new(Arc::clone(transport), characteristic);
        capability.start_notifications(on_sample).await?;
        Ok::<_, TransportError>(capability)
    };

    attached
        .await
        .map_err(|source| AttachError::new(CapabilityKind::HeartRate, source))
}

#[instrument(skip_all, level = "debug")]
async fn attach_battery(
    transport: &Arc<dyn GattTransport>,
) -> Result<BatteryCapability, AttachError> {
    let attached = async {
        let service = transport
            .primary_service(GattEndpoint::BatteryService.uuid())
            .await?;
        let characteristic = transport
            .characteristic(service, GattEndpoint::BatteryLevel.uuid())
            .await?;
        Ok::<_, TransportError>(BatteryCapability::new(Arc::clone(transport), characteristic))
    };

    attached
        .await
        .map_err(|source| AttachError::new(CapabilityKind::Battery, source))
}
