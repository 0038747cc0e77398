use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, instrument, warn};

use crate::cli::OutputFormat;
use crate::error::SessionError;
use crate::hw::{
    BatteryLevel, CapabilityKind, HeartRateSample, MonitorStopReason, MonitorSummary,
    PeripheralInfo, SessionCallbacks, SessionHandle, SessionManager,
};
use crate::terminal::TerminalClient;

use super::ui::{MonitorSummaryView, Painter, SampleView, SessionView};

/// Arguments for the `monitor` command.
#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Stop after this many heart-rate samples. If omitted, monitor until Ctrl+C.
    #[arg(long)]
    max_samples: Option<usize>,
}

impl MonitorArgs {
    /// Creates monitor arguments with an optional sample limit.
    #[must_use]
    pub fn new(max_samples: Option<usize>) -> Self {
        Self { max_samples }
    }

    pub(crate) fn max_samples(&self) -> Option<usize> {
        self.max_samples
    }
}

/// Events forwarded from session callbacks to the monitor loop.
#[derive(Debug)]
enum MonitorEvent {
    Sample(HeartRateSample),
    LinkLost,
}

/// JSON document emitted by `monitor`.
#[derive(Serialize)]
struct MonitorReport<'a> {
    device: &'a PeripheralInfo,
    capabilities: &'a [CapabilityKind],
    battery_percent: Option<u8>,
    samples: &'a [HeartRateSample],
    summary: &'a MonitorSummary,
}

/// Executes the `monitor` command.
#[instrument(skip(manager, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    manager: SessionManager,
    args: &MonitorArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    if !manager.is_available().await {
        return Err(SessionError::CapabilityUnavailable.into());
    }

    let (events, mut received) = mpsc::unbounded_channel();
    let link_events = events.clone();
    let callbacks = SessionCallbacks::new(
        move || {
            // The monitor loop may already have finished.
            let _ = link_events.send(MonitorEvent::LinkLost);
        },
        move |sample| {
            let _ = events.send(MonitorEvent::Sample(sample));
        },
    );
    let handle = manager.connect(callbacks).await?;
    let capabilities = handle.services().attached();
    let battery = read_battery_once(&handle).await;
    let painter = Painter::new(terminal_client.stdout_is_terminal());

    let streamed = match output_format {
        OutputFormat::Pretty => {
            let view = SessionView::new(handle.peripheral(), &capabilities, battery, &painter);
            match writeln!(out, "{view}\n") {
                Ok(()) => {
                    stream_samples(&handle, args.max_samples(), &mut received, |index, sample| {
                        writeln!(out, "{}", SampleView::new(index, sample, &painter))
                    })
                    .await
                }
                Err(error) => Err(error),
            }
        }
        OutputFormat::Json => {
            stream_samples(&handle, args.max_samples(), &mut received, |_index, _sample| Ok(()))
                .await
        }
    };

    let peripheral = handle.peripheral().clone();
    manager.disconnect(handle).await?;
    let (stop_reason, streamed_samples) = streamed?;
    let summary = MonitorSummary::from_samples(&streamed_samples, stop_reason);
    info!(
        received = summary.received_samples(),
        stop_reason = %summary.stop_reason(),
        "monitor finished"
    );

    match output_format {
        OutputFormat::Pretty => {
            writeln!(out)?;
            writeln!(out, "{}", MonitorSummaryView::new(&summary, &painter))?;
        }
        OutputFormat::Json => {
            let report = MonitorReport {
                device: &peripheral,
                capabilities: &capabilities,
                battery_percent: battery.map(BatteryLevel::percent),
                samples: &streamed_samples,
                summary: &summary,
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

/// Reads the battery once when the capability is attached. Read failures
/// degrade to "not available".
async fn read_battery_once(handle: &SessionHandle) -> Option<BatteryLevel> {
    let battery = handle.services().battery()?;
    match battery.get_battery_level().await {
        Ok(level) => Some(level),
        Err(error) => {
            warn!(%error, "battery read failed; continuing without a battery level");
            None
        }
    }
}

/// Forwards samples to `on_sample` until the limit, Ctrl+C, or link loss.
async fn stream_samples<F>(
    handle: &SessionHandle,
    max_samples: Option<usize>,
    received: &mut UnboundedReceiver<MonitorEvent>,
    mut on_sample: F,
) -> io::Result<(MonitorStopReason, Vec<HeartRateSample>)>
where
    F: FnMut(usize, HeartRateSample) -> io::Result<()>,
{
    let mut samples = Vec::new();
    if handle.services().heart_rate().is_none() {
        return Ok((MonitorStopReason::NoHeartRate, samples));
    }

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let stop_reason = loop {
        if let Some(limit) = max_samples
            && samples.len() >= limit
        {
            break MonitorStopReason::ReachedLimit(limit);
        }

        tokio::select! {
            _ = &mut interrupted => break MonitorStopReason::Interrupted,
            event = received.recv() => match event {
                Some(MonitorEvent::Sample(sample)) => {
                    samples.push(sample);
                    on_sample(samples.len(), sample)?;
                }
                Some(MonitorEvent::LinkLost) | None => {
                    debug!("link lost while monitoring");
                    break MonitorStopReason::LinkLost;
                }
            },
        }
    };

    Ok((stop_reason, samples))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    use super::*;
    use crate::hw::{FakeAdapter, FakeBackendConfig, FakeController};

    struct PlainTerminal;

    impl TerminalClient for PlainTerminal {
        fn stdout_is_terminal(&self) -> bool {
            false
        }

        fn stderr_is_terminal(&self) -> bool {
            false
        }
    }

    fn manager(config: FakeBackendConfig) -> (SessionManager, FakeController) {
        let adapter = FakeAdapter::new(config);
        let controller = adapter.controller();
        (SessionManager::new(Box::new(adapter)), controller)
    }

    fn device() -> crate::hw::FakeDevice {
        "AA:BB|Polar H10".parse().expect("record should parse")
    }

    #[tokio::test]
    async fn stops_at_sample_limit_and_disconnects() {
        let (manager, controller) = manager(FakeBackendConfig::builder().device(device()).build());
        let mut out = Vec::new();

        run(
            manager,
            &MonitorArgs::new(Some(2)),
            &mut out,
            &PlainTerminal,
            OutputFormat::Pretty,
        )
        .await
        .expect("monitor should succeed");

        let rendered = String::from_utf8(out).expect("output should be utf-8");
        assert!(rendered.contains("[0001] 72 bpm"));
        assert!(rendered.contains("[0002] 75 bpm"));
        assert!(!rendered.contains("[0003]"));
        assert!(rendered.contains("reached sample limit (2)"));
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn link_loss_ends_the_run() {
        let (manager, controller) = manager(
            FakeBackendConfig::builder()
                .device(device())
                .notifications("0050".parse().expect("payload should parse"))
                .build(),
        );
        let mut out = Vec::new();

        let dropper = tokio::spawn({
            let controller = controller.clone();
            async move {
                while !controller.emit_heart_rate(&[0x00, 81]) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                controller.emit_link_loss();
            }
        });

        timeout(
            Duration::from_secs(5),
            run(
                manager,
                &MonitorArgs::new(None),
                &mut out,
                &PlainTerminal,
                OutputFormat::Json,
            ),
        )
        .await
        .expect("monitor should stop on link loss")
        .expect("monitor should succeed");
        dropper.await.expect("dropper task should finish");

        let report: serde_json::Value =
            serde_json::from_slice(&out).expect("output should be JSON");
        assert_eq!("link_lost", report["summary"]["stop_reason"]);
        assert_eq!(serde_json::json!([80, 81]), report["samples"]);
        assert_eq!(87, report["battery_percent"]);
    }

    #[tokio::test]
    async fn unavailable_platform_is_reported_before_discovery() {
        let (manager, _controller) = manager(
            FakeBackendConfig::builder()
                .device(device())
                .available(false)
                .build(),
        );
        let mut out = Vec::new();

        let error = run(
            manager,
            &MonitorArgs::new(Some(1)),
            &mut out,
            &PlainTerminal,
            OutputFormat::Pretty,
        )
        .await
        .expect_err("monitor should fail without BLE support");

        assert_matches!(
            error.downcast_ref::<SessionError>(),
            Some(SessionError::CapabilityUnavailable)
        );
        assert!(out.is_empty());
    }
}
