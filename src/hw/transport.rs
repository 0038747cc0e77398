use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::model::PeripheralInfo;
use crate::error::{ConnectionError, DiscoveryError, TransportError};

/// Raw characteristic values pushed by the platform, in arrival order.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Listener invoked by the platform whenever the link drops.
pub type LinkLossListener = Arc<dyn Fn() + Send + Sync>;

/// Discovery request passed to the platform picker.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct DeviceRequest {
    /// Services a candidate must advertise.
    #[builder(default)]
    filter_services: Vec<Uuid>,
    /// Services resolvable after connect without filtering candidates.
    #[builder(default)]
    optional_services: Vec<Uuid>,
    /// Optional local-name prefix narrowing candidates.
    #[builder(into)]
    name_prefix: Option<String>,
}

impl DeviceRequest {
    #[must_use]
    pub fn filter_services(&self) -> &[Uuid] {
        &self.filter_services
    }

    #[must_use]
    pub fn optional_services(&self) -> &[Uuid] {
        &self.optional_services
    }

    #[must_use]
    pub fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    /// Returns whether an advertised name passes the name-prefix filter.
    pub(crate) fn accepts_name(&self, local_name: Option<&str>) -> bool {
        match self.name_prefix.as_deref() {
            None | Some("") => true,
            Some(prefix) => local_name.is_some_and(|name| name.starts_with(prefix)),
        }
    }

    /// Returns whether every filter service is advertised.
    pub(crate) fn accepts_services(&self, advertised: &[Uuid]) -> bool {
        self.filter_services
            .iter()
            .all(|required| advertised.contains(required))
    }
}

/// A resolved primary service on a connected peripheral.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ServiceHandle {
    uuid: Uuid,
}

impl ServiceHandle {
    pub(crate) fn new(uuid: Uuid) -> Self {
        Self { uuid }
    }

    #[must_use]
    pub fn uuid(self) -> Uuid {
        self.uuid
    }
}

/// A resolved characteristic within a service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CharacteristicHandle {
    service_uuid: Uuid,
    uuid: Uuid,
}

impl CharacteristicHandle {
    pub(crate) fn new(service: ServiceHandle, uuid: Uuid) -> Self {
        Self {
            service_uuid: service.uuid(),
            uuid,
        }
    }

    #[must_use]
    pub fn service_uuid(self) -> Uuid {
        self.service_uuid
    }

    #[must_use]
    pub fn uuid(self) -> Uuid {
        self.uuid
    }
}

/// Registration of a link-loss listener on a peripheral.
///
/// Dropping the watch unregisters the listener. [`LinkLossWatch::detach`]
/// leaves it armed until the link drops.
#[derive(Debug)]
pub struct LinkLossWatch {
    cancel: Option<CancellationToken>,
}

impl LinkLossWatch {
    /// Wraps the token that unregisters the listener when cancelled.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    /// Releases ownership without unregistering the listener.
    pub fn detach(mut self) {
        self.cancel.take();
    }
}

impl Drop for LinkLossWatch {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

/// Platform BLE capability injected into the session manager.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Returns whether the platform has usable BLE support.
    async fn is_available(&self) -> bool;

    /// Picks one peripheral matching the request.
    async fn request_device(
        &self,
        request: &DeviceRequest,
    ) -> Result<Box<dyn BlePeripheral>, DiscoveryError>;
}

/// A discovered peripheral that has not been connected yet.
#[async_trait]
pub trait BlePeripheral: Send + Sync + Debug {
    /// Returns identity details captured at discovery time.
    fn info(&self) -> PeripheralInfo;

    /// Registers a listener for the peripheral's link-loss event.
    async fn watch_link_loss(
        &self,
        listener: LinkLossListener,
    ) -> Result<LinkLossWatch, ConnectionError>;

    /// Establishes the GATT-level connection.
    async fn connect_gatt(&self) -> Result<Arc<dyn GattTransport>, ConnectionError>;
}

/// A live GATT link to one peripheral.
#[async_trait]
pub trait GattTransport: Send + Sync + Debug {
    async fn is_connected(&self) -> Result<bool, TransportError>;

    async fn primary_service(&self, uuid: Uuid) -> Result<ServiceHandle, TransportError>;

    async fn characteristic(
        &self,
        service: ServiceHandle,
        uuid: Uuid,
    ) -> Result<CharacteristicHandle, TransportError>;

    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Vec<u8>, TransportError>;

    /// Starts value-changed notifications and returns their stream.
    async fn subscribe(
        &self,
        characteristic: CharacteristicHandle,
    ) -> Result<NotificationStream, TransportError>;

    async fn unsubscribe(&self, characteristic: CharacteristicHandle)
    -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
