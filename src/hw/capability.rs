use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::model::{BatteryLevel, HeartRateSample};
use super::transport::{CharacteristicHandle, GattTransport, NotificationStream};
use crate::decode::FrameDecoder;
use crate::gatt::describe_uuid;
use crate::error::{SessionError, TransportError};

/// Optional capabilities a session may attach.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    #[display("heart-rate")]
    HeartRate,
    #[display("battery")]
    Battery,
}

/// Active delivery of decoded notifications to one subscriber.
///
/// Dropping the subscription stops delivery without waiting for the task.
#[derive(Debug)]
pub(crate) struct NotificationSubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NotificationSubscription {
    fn spawn<F>(mut notifications: NotificationStream, mut on_sample: F) -> Self
    where
        F: FnMut(HeartRateSample) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    biased;
                    () = stopped.cancelled() => break,
                    payload = notifications.next() => payload,
                };
                let Some(payload) = payload else {
                    debug!("heart-rate notification stream closed");
                    break;
                };

                match FrameDecoder::heart_rate(&payload) {
                    Ok(sample) => on_sample(sample),
                    Err(error) => warn!(%error, "dropping malformed heart-rate notification"),
                }
            }
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Returns whether the delivery task is still running.
    fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops delivery and waits for the delivery task to finish.
    pub(crate) async fn cancel(mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(error) = task.await {
            warn!(%error, "heart-rate delivery task ended abnormally");
        }
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Heart Rate Measurement notifications from one peripheral.
#[derive(Debug)]
pub struct HeartRateCapability {
    transport: Arc<dyn GattTransport>,
    characteristic: CharacteristicHandle,
    subscriber: Mutex<Option<NotificationSubscription>>,
}

impl HeartRateCapability {
    pub(crate) fn new(transport: Arc<dyn GattTransport>, characteristic: CharacteristicHandle) -> Self {
        Self {
            transport,
            characteristic,
            subscriber: Mutex::new(None),
        }
    }

    /// Registers `on_sample` as the only subscriber and starts notifications.
    ///
    /// Samples are delivered in the order the transport raised them. Payloads
    /// that fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the subscription. No subscriber
    /// is registered in that case.
    #[instrument(
        skip(self, on_sample),
        level = "debug",
        fields(characteristic = %describe_uuid(self.characteristic.uuid()))
    )]
    pub async fn start_notifications<F>(&self, on_sample: F) -> Result<(), TransportError>
    where
        F: FnMut(HeartRateSample) + Send + 'static,
    {
        if let Some(previous) = self.take_subscriber() {
            debug!("replacing existing heart-rate subscriber");
            previous.cancel().await;
        }

        let notifications = self.transport.subscribe(self.characteristic).await?;
        let subscription = NotificationSubscription::spawn(notifications, on_sample);
        let replaced = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription);
        if let Some(replaced) = replaced {
            replaced.cancel().await;
        }
        Ok(())
    }

    /// Clears the subscriber and stops notifications.
    ///
    /// Calling this with no subscriber registered is a no-op. The local
    /// subscriber is always cleared, even when the platform request fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform stop request fails.
    #[instrument(
        skip(self),
        level = "debug",
        fields(characteristic = %describe_uuid(self.characteristic.uuid()))
    )]
    pub async fn stop_notifications(&self) -> Result<(), TransportError> {
        let Some(subscription) = self.take_subscriber() else {
            debug!("no heart-rate subscriber registered");
            return Ok(());
        };

        subscription.cancel().await;
        self.transport.unsubscribe(self.characteristic).await
    }

    /// Returns whether a subscriber is registered and still receiving.
    ///
    /// Turns false once the platform stream ends, e.g. after link loss.
    #[must_use]
    pub fn is_notifying(&self) -> bool {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(NotificationSubscription::is_active)
    }

    fn take_subscriber(&self) -> Option<NotificationSubscription> {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// On-demand Battery Level reads from one peripheral.
#[derive(Debug)]
pub struct BatteryCapability {
    transport: Arc<dyn GattTransport>,
    characteristic: CharacteristicHandle,
    in_flight: tokio::sync::Mutex<()>,
}

impl BatteryCapability {
    pub(crate) fn new(transport: Arc<dyn GattTransport>, characteristic: CharacteristicHandle) -> Self {
        Self {
            transport,
            characteristic,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Reads and decodes the current battery level.
    ///
    /// Every call issues a fresh read. Concurrent callers are serialised.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the read fails, or a decode error if the
    /// payload is empty.
    #[instrument(
        skip(self),
        level = "debug",
        fields(characteristic = %describe_uuid(self.characteristic.uuid()))
    )]
    pub async fn get_battery_level(&self) -> Result<BatteryLevel, SessionError> {
        let _in_flight = self.in_flight.lock().await;
        let payload = self.transport.read(self.characteristic).await?;
        Ok(FrameDecoder::battery_level(&payload)?)
    }
}
