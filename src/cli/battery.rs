use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::cli::OutputFormat;
use crate::error::SessionError;
use crate::hw::{BatteryLevel, PeripheralInfo, SessionCallbacks, SessionManager};
use crate::terminal::TerminalClient;

use super::ui::{BatteryView, Painter};

/// JSON document emitted by `battery`.
#[derive(Serialize)]
struct BatteryReport<'a> {
    device: &'a PeripheralInfo,
    battery_percent: Option<u8>,
}

/// Executes the `battery` command.
#[instrument(skip(manager, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    manager: SessionManager,
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

    let callbacks = SessionCallbacks::new(
        || debug!("link dropped after battery read"),
        |_sample| {},
    );
    let handle = manager.connect(callbacks).await?;
    let read = match handle.services().battery() {
        Some(battery) => battery.get_battery_level().await.map(Some),
        None => Ok(None),
    };
    let peripheral = handle.peripheral().clone();
    manager.disconnect(handle).await?;
    let battery: Option<BatteryLevel> = read?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", BatteryView::new(&peripheral, battery, &painter))?;
        }
        OutputFormat::Json => {
            let report = BatteryReport {
                device: &peripheral,
                battery_percent: battery.map(BatteryLevel::percent),
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
