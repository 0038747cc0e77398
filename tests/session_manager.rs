use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn manager(fake_args: bandlink::FakeArgs) -> bandlink::SessionManager {
    bandlink::SessionManager::new(bandlink::fake_ble_adapter(fake_args))
}

async fn next_sample(
    received: &mut mpsc::UnboundedReceiver<bandlink::HeartRateSample>,
) -> bandlink::HeartRateSample {
    timeout(Duration::from_secs(2), received.recv())
        .await
        .expect("a sample should arrive")
        .expect("the sample channel should stay open")
}

#[tokio::test]
async fn connect_streams_samples_in_arrival_order() -> anyhow::Result<()> {
    let fake = bandlink::FakeArgs::builder()
        .device("AA:BB|Polar H10")?
        .notifications("0048,014B00,ff,004A")?
        .build();
    let manager = manager(fake);
    let (samples, mut received) = mpsc::unbounded_channel();

    let handle = manager
        .connect(bandlink::SessionCallbacks::new(
            || {},
            move |sample| {
                let _ = samples.send(sample);
            },
        ))
        .await?;

    assert_eq!("Polar H10", handle.name());
    assert_eq!("AA:BB", handle.device_id());
    assert_eq!(
        vec![
            bandlink::CapabilityKind::HeartRate,
            bandlink::CapabilityKind::Battery
        ],
        handle.services().attached()
    );

    let mut bpm = Vec::new();
    for _ in 0..3 {
        bpm.push(next_sample(&mut received).await.bpm());
    }
    assert_eq!(vec![72, 75, 74], bpm);

    manager.disconnect(handle).await?;
    Ok(())
}

#[tokio::test]
async fn battery_is_read_on_demand() -> anyhow::Result<()> {
    let fake = bandlink::FakeArgs::builder()
        .device("AA:BB|Polar H10")?
        .battery("64")?
        .build();
    let manager = manager(fake);
    let handle = manager
        .connect(bandlink::SessionCallbacks::new(|| {}, |_sample| {}))
        .await?;

    let battery = handle
        .services()
        .battery()
        .expect("battery capability should attach");
    assert_eq!(100, battery.get_battery_level().await?.percent());
    assert_eq!(100, battery.get_battery_level().await?.percent());

    manager.disconnect(handle).await?;
    Ok(())
}

#[tokio::test]
async fn missing_battery_service_yields_a_heart_rate_only_session() -> anyhow::Result<()> {
    let fake = bandlink::FakeArgs::builder()
        .device("AA:BB|-")?
        .without_battery(true)
        .build();
    let manager = manager(fake);
    let handle = manager
        .connect(bandlink::SessionCallbacks::new(|| {}, |_sample| {}))
        .await?;

    assert_eq!(bandlink::UNKNOWN_DEVICE_NAME, handle.name());
    assert!(handle.services().battery().is_none());
    assert!(
        handle
            .services()
            .heart_rate()
            .is_some_and(bandlink::HeartRateCapability::is_notifying)
    );

    manager.disconnect(handle).await?;
    Ok(())
}

#[tokio::test]
async fn disconnect_stops_notifications_and_fires_callback_once() -> anyhow::Result<()> {
    let fake = bandlink::FakeArgs::builder()
        .device("AA:BB|Polar H10")?
        .build();
    let manager = manager(fake);
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);

    let handle = manager
        .connect(bandlink::SessionCallbacks::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_sample| {},
        ))
        .await?;
    assert!(handle.is_connected().await?);

    manager.disconnect(handle).await?;
    assert_eq!(1, disconnects.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn fake_adapter_reports_ble_support() -> anyhow::Result<()> {
    let fake = bandlink::FakeArgs::builder()
        .device("AA:BB|Polar H10")?
        .build();
    let manager = manager(fake);

    assert!(manager.is_available().await);
    Ok(())
}

#[tokio::test]
async fn rejected_connection_is_a_connection_error() -> anyhow::Result<()> {
    let fake = bandlink::FakeArgs::builder()
        .device("AA:BB|Polar H10")?
        .reject_connect(true)
        .build();
    let manager = manager(fake);
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);

    let result = manager
        .connect(bandlink::SessionCallbacks::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_sample| {},
        ))
        .await;

    assert_matches!(
        result,
        Err(bandlink::SessionError::Connection(
            bandlink::ConnectionError::Unreachable { .. }
        ))
    );
    assert_eq!(0, disconnects.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn decoder_is_usable_without_a_session() {
    assert_eq!(
        Ok(300),
        bandlink::FrameDecoder::heart_rate(&[0x01, 0x2C, 0x01]).map(u16::from)
    );
    assert_matches!(
        bandlink::FrameDecoder::battery_level(&[]),
        Err(bandlink::DecodeError::EmptyBatteryLevel)
    );
}
